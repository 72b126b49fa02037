use super::filename::last_path_segment;

/// Ordered symbol list used to derive stable, filesystem-safe indices from
/// short asset tokens such as `a3Fx`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbolAlphabet {
    symbols: Vec<String>,
}

impl Default for SymbolAlphabet {
    /// Digits, lowercase, uppercase.
    fn default() -> Self {
        let symbols = ('0'..='9')
            .chain('a'..='z')
            .chain('A'..='Z')
            .map(|c| c.to_string())
            .collect();
        Self { symbols }
    }
}

impl SymbolAlphabet {
    pub fn new(symbols: Vec<String>) -> Self {
        Self { symbols }
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    fn position(&self, symbol: char) -> Option<usize> {
        let mut buf = [0u8; 4];
        let symbol: &str = symbol.encode_utf8(&mut buf);
        self.symbols.iter().position(|s| s == symbol)
    }

    /// Two-digit positions of each token character, concatenated. Characters
    /// outside the alphabet are dropped.
    pub fn encode(&self, token: &str) -> String {
        token
            .chars()
            .filter_map(|c| self.position(c))
            .map(|p| format!("{:02}", p))
            .collect()
    }

    /// Stable index for the asset token at the end of `url`. Falls back to
    /// the raw token when nothing in it is in the alphabet.
    pub fn stable_index(&self, url: &str) -> String {
        let token = last_path_segment(url).unwrap_or_default();
        let encoded = self.encode(&token);
        if encoded.is_empty() {
            token.replace(|c: char| !c.is_ascii_alphanumeric(), "_")
        } else {
            encoded
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_alphabet_encoding() {
        let alphabet = SymbolAlphabet::default();
        assert_eq!(alphabet.len(), 62);
        assert_eq!(alphabet.encode("a3Fx"), "10034133");
        assert_eq!(alphabet.stable_index("https://imgdb.in/a3Fx"), "10034133");
    }

    #[test]
    fn test_stable_index_is_deterministic() {
        let alphabet = SymbolAlphabet::default();
        let a = alphabet.stable_index("https://imgdb.in/Qz9");
        let b = alphabet.stable_index("https://www.imgdb.in/Qz9?ref=x");
        assert_eq!(a, b);
    }

    #[test]
    fn test_custom_alphabet() {
        let alphabet = SymbolAlphabet::new(vec!["x".into(), "y".into(), "z".into()]);
        assert_eq!(alphabet.len(), 3);
        assert_eq!(alphabet.encode("zyxq"), "020100");
    }

    #[test]
    fn test_unencodable_token_falls_back() {
        let alphabet = SymbolAlphabet::new(vec!["a".into()]);
        assert_eq!(alphabet.stable_index("https://imgdb.in/Z-9"), "Z_9");
    }
}

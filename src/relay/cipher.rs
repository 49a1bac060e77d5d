// Pluggable encoding for direct-message bodies
//
// The relay forwards direct messages untouched; only clients apply a cipher.

/// Reversible transform applied to direct-message payloads
pub trait PayloadCipher: Send + Sync {
    fn encode(&self, plain: &[u8]) -> Vec<u8>;
    fn decode(&self, encoded: &[u8]) -> Vec<u8>;
}

/// Single-byte XOR, compatible with the stock terminal clients
#[derive(Debug, Clone, Copy)]
pub struct XorCipher {
    key: u8,
}

impl XorCipher {
    pub const DEFAULT_KEY: u8 = 0x5A;

    pub fn new(key: u8) -> Self {
        Self { key }
    }
}

impl Default for XorCipher {
    fn default() -> Self {
        Self::new(Self::DEFAULT_KEY)
    }
}

impl PayloadCipher for XorCipher {
    fn encode(&self, plain: &[u8]) -> Vec<u8> {
        plain.iter().map(|b| b ^ self.key).collect()
    }

    fn decode(&self, encoded: &[u8]) -> Vec<u8> {
        self.encode(encoded)
    }
}

/// Identity transform
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainText;

impl PayloadCipher for PlainText {
    fn encode(&self, plain: &[u8]) -> Vec<u8> {
        plain.to_vec()
    }

    fn decode(&self, encoded: &[u8]) -> Vec<u8> {
        encoded.to_vec()
    }
}

//! WAL record codec: optional lz4 compression, optional ChaCha20-Poly1305
//! encryption, then base64 so each record fits on one line.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use ring::aead::{Aad, LessSafeKey, Nonce, UnboundKey, CHACHA20_POLY1305, NONCE_LEN};
use ring::rand::{SecureRandom, SystemRandom};

use grizzly_common::config::WalConfig;
use grizzly_common::error::{Error, Result, StorageError};

pub const KEY_LEN: usize = 32;

/// Encodes and decodes WAL payloads
#[derive(Clone)]
pub struct WalCodec {
    compression: bool,
    key: Option<[u8; KEY_LEN]>,
}

impl std::fmt::Debug for WalCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WalCodec")
            .field("compression", &self.compression)
            .field("encrypted", &self.key.is_some())
            .finish()
    }
}

impl WalCodec {
    /// Plain base64, no compression or encryption
    pub fn plain() -> Self {
        Self {
            compression: false,
            key: None,
        }
    }

    pub fn new(compression: bool, key: Option<[u8; KEY_LEN]>) -> Self {
        Self { compression, key }
    }

    /// Codec described by WAL settings; the key is hex
    pub fn from_config(config: &WalConfig) -> Result<Self> {
        let key = match &config.encryption_key {
            Some(hex_key) => Some(parse_key(hex_key)?),
            None => None,
        };
        Ok(Self::new(config.compression, key))
    }

    pub fn is_encrypted(&self) -> bool {
        self.key.is_some()
    }

    pub fn encode(&self, payload: &[u8]) -> Result<String> {
        let mut bytes = if self.compression {
            lz4_flex::compress_prepend_size(payload)
        } else {
            payload.to_vec()
        };
        if let Some(key) = &self.key {
            bytes = seal(key, bytes)?;
        }
        Ok(STANDARD.encode(bytes))
    }

    pub fn decode(&self, record: &str) -> Result<Vec<u8>> {
        let mut bytes = STANDARD
            .decode(record.trim())
            .map_err(|e| codec_error(format!("invalid base64: {}", e)))?;
        if let Some(key) = &self.key {
            bytes = open(key, bytes)?;
        }
        if self.compression {
            bytes = lz4_flex::decompress_size_prepended(&bytes)
                .map_err(|e| codec_error(format!("lz4: {}", e)))?;
        }
        Ok(bytes)
    }
}

fn codec_error(message: String) -> Error {
    StorageError::Codec(message).into()
}

fn parse_key(hex_key: &str) -> Result<[u8; KEY_LEN]> {
    let bytes = hex::decode(hex_key).map_err(|e| Error::Config(format!("encryption_key: {}", e)))?;
    <[u8; KEY_LEN]>::try_from(bytes.as_slice())
        .map_err(|_| Error::Config(format!("encryption_key must be {} bytes", KEY_LEN)))
}

fn aead_key(key: &[u8; KEY_LEN]) -> Result<LessSafeKey> {
    let unbound = UnboundKey::new(&CHACHA20_POLY1305, key)
        .map_err(|_| codec_error("invalid key".to_string()))?;
    Ok(LessSafeKey::new(unbound))
}

/// Output is `nonce || ciphertext || tag`
fn seal(key: &[u8; KEY_LEN], mut data: Vec<u8>) -> Result<Vec<u8>> {
    let mut nonce = [0u8; NONCE_LEN];
    SystemRandom::new()
        .fill(&mut nonce)
        .map_err(|_| codec_error("nonce generation failed".to_string()))?;
    aead_key(key)?
        .seal_in_place_append_tag(Nonce::assume_unique_for_key(nonce), Aad::empty(), &mut data)
        .map_err(|_| codec_error("encryption failed".to_string()))?;

    let mut out = Vec::with_capacity(NONCE_LEN + data.len());
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&data);
    Ok(out)
}

fn open(key: &[u8; KEY_LEN], data: Vec<u8>) -> Result<Vec<u8>> {
    if data.len() < NONCE_LEN {
        return Err(codec_error("record shorter than nonce".to_string()));
    }
    let mut nonce = [0u8; NONCE_LEN];
    nonce.copy_from_slice(&data[..NONCE_LEN]);
    let mut sealed = data[NONCE_LEN..].to_vec();
    let plain_len = aead_key(key)?
        .open_in_place(Nonce::assume_unique_for_key(nonce), Aad::empty(), &mut sealed)
        .map_err(|_| codec_error("authentication failed".to_string()))?
        .len();
    sealed.truncate(plain_len);
    Ok(sealed)
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: &str = "000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f";

    #[test]
    fn test_plain_is_base64_of_payload() {
        let codec = WalCodec::plain();
        let encoded = codec.encode(b"{\"seq\":1}").unwrap();
        assert_eq!(encoded, STANDARD.encode(b"{\"seq\":1}"));
        assert_eq!(codec.decode(&encoded).unwrap(), b"{\"seq\":1}");
    }

    #[test]
    fn test_encrypted_records_differ_and_decode() {
        let config = WalConfig {
            compression: true,
            encryption_key: Some(KEY.to_string()),
            ..WalConfig::default()
        };
        let codec = WalCodec::from_config(&config).unwrap();
        let payload = b"insert into orders values (1, 10)".repeat(4);

        let a = codec.encode(&payload).unwrap();
        let b = codec.encode(&payload).unwrap();
        assert_ne!(a, b);
        assert_eq!(codec.decode(&a).unwrap(), payload);
    }

    #[test]
    fn test_wrong_key_fails_authentication() {
        let writer = WalCodec::new(false, Some([7u8; KEY_LEN]));
        let reader = WalCodec::new(false, Some([8u8; KEY_LEN]));
        let record = writer.encode(b"secret").unwrap();
        assert!(reader.decode(&record).is_err());
    }

    #[test]
    fn test_bad_hex_key_rejected() {
        let config = WalConfig {
            encryption_key: Some("zz".to_string()),
            ..WalConfig::default()
        };
        assert!(WalCodec::from_config(&config).is_err());
    }
}

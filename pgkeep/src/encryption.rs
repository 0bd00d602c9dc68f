//! Passphrase encryption of backup streams with age (scrypt recipient).

use crate::utils::errors::EncryptionError;
use age::secrecy::SecretString;
use std::io::{self, Read, Write};

#[derive(Clone)]
pub struct Encryptor {
    passphrase: String,
}

impl Encryptor {
    pub fn new(passphrase: &str) -> Result<Self, EncryptionError> {
        if passphrase.is_empty() {
            return Err(EncryptionError::EmptyKey);
        }
        Ok(Self {
            passphrase: passphrase.to_string(),
        })
    }

    /// Build from an optional configured key; `None` means write in clear.
    pub fn from_key(key: Option<&str>) -> Result<Option<Self>, EncryptionError> {
        key.map(Self::new).transpose()
    }

    fn secret(&self) -> SecretString {
        SecretString::from(self.passphrase.clone())
    }

    /// Wrap a writer; the returned stream must be `finish()`ed to emit the final chunk.
    pub fn encrypt_to<W: Write>(&self, output: W) -> io::Result<age::stream::StreamWriter<W>> {
        age::Encryptor::with_user_passphrase(self.secret()).wrap_output(output)
    }

    pub fn decrypt_from<R: Read>(
        &self,
        input: R,
    ) -> Result<age::stream::StreamReader<R>, EncryptionError> {
        let decryptor = age::Decryptor::new(input)?;
        let identity = age::scrypt::Identity::new(self.secret());
        Ok(decryptor.decrypt(std::iter::once(&identity as &dyn age::Identity))?)
    }
}

impl std::fmt::Debug for Encryptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Encryptor")
            .field("passphrase", &"<redacted>")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_key_rejected() {
        assert!(matches!(Encryptor::new(""), Err(EncryptionError::EmptyKey)));
        assert!(Encryptor::from_key(None).unwrap().is_none());
    }

    #[test]
    fn test_wrong_passphrase_fails() {
        let mut sealed = Vec::new();
        let mut writer = Encryptor::new("right").unwrap().encrypt_to(&mut sealed).unwrap();
        writer.write_all(b"select 1;").unwrap();
        writer.finish().unwrap();

        let result = Encryptor::new("wrong").unwrap().decrypt_from(sealed.as_slice());
        assert!(matches!(result, Err(EncryptionError::Decrypt(_))));

        let mut plain = Vec::new();
        Encryptor::new("right")
            .unwrap()
            .decrypt_from(sealed.as_slice())
            .unwrap()
            .read_to_end(&mut plain)
            .unwrap();
        assert_eq!(plain, b"select 1;");
    }

    #[test]
    fn test_debug_hides_passphrase() {
        let encryptor = Encryptor::new("hunter2").unwrap();
        assert!(!format!("{:?}", encryptor).contains("hunter2"));
    }
}

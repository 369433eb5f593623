//! password-protected long-term key storage (spec.md §4.2)

pub mod error;
pub mod savefile;

pub use error::{KeystoreError, Result};
pub use savefile::{open, register, SaveFile, SAVE_FILE_LEN};

use std::path::Path;

/// read a save file from `path` and parse it.
pub fn load(path: impl AsRef<Path>) -> Result<SaveFile> {
    let bytes = std::fs::read(path)?;
    SaveFile::from_bytes(&bytes)
}

/// write a save file to `path`.
pub fn store(path: impl AsRef<Path>, file: &SaveFile) -> Result<()> {
    std::fs::write(path, file.to_bytes())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha20Rng;
    use rosetta_crypto::group::GroupParams;

    #[test]
    fn store_then_load_roundtrips_through_disk() {
        let params =
            GroupParams::new(&467u32.to_be_bytes(), &233u32.to_be_bytes(), &4u32.to_be_bytes()).unwrap();
        let mut rng = ChaCha20Rng::seed_from_u64(9);
        let (file, original) = register(&params, b"disk password", &mut rng).unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("client.save");
        store(&path, &file).unwrap();

        let reloaded = load(&path).unwrap();
        let recovered = open(&params, &reloaded, b"disk password").unwrap();
        assert_eq!(recovered.private, original.private);
    }
}

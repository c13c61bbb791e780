//! SHA helpers.

use std::io::Read;

use anyhow::Error;

/// Calculate the sha256sum from a readable object.
pub fn sha256(file: &mut dyn Read) -> Result<([u8; 32], u64), Error> {
    let mut hasher = openssl::sha::Sha256::new();
    let mut buffer = vec![0u8; 64 * 1024];
    let mut size: u64 = 0;

    loop {
        let count = match file.read(&mut buffer) {
            Ok(0) => break,
            Ok(count) => count,
            Err(ref err) if err.kind() == std::io::ErrorKind::Interrupted => {
                continue;
            }
            Err(err) => return Err(err.into()),
        };
        size += count as u64;
        hasher.update(&buffer[..count]);
    }

    let csum = hasher.finish();

    Ok((csum, size))
}

/// Calculate the sha256sum from a readable object as lowercase hex string.
pub fn sha256_hex(file: &mut dyn Read) -> Result<String, Error> {
    let (csum, _size) = sha256(file)?;
    Ok(hex::encode(csum))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_sha256_hex() -> Result<(), Error> {
        let digest = sha256_hex(&mut &b"abc"[..])?;
        assert_eq!(
            digest,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert_eq!(digest.len(), 64);

        let empty = sha256_hex(&mut &b""[..])?;
        assert_eq!(
            empty,
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );

        assert_eq!(sha256_hex(&mut &b"abc"[..])?, digest);
        assert_ne!(sha256_hex(&mut &b"abd"[..])?, digest);

        let (_, size) = sha256(&mut &b"abc"[..])?;
        assert_eq!(size, 3);

        Ok(())
    }
}

//! Input decoding
//!
//! Access-log exports arrive plain, gzip'ed or zstd'ed. Detection looks at
//! magic bytes first and falls back to the file extension, defaulting to
//! plain text. Decoding streams; nothing beyond the reader buffers is held
//! in memory.

use std::{io, path::Path};

use async_compression::tokio::bufread::{GzipDecoder, ZstdDecoder};
use tokio::{
    fs,
    io::{AsyncBufRead, AsyncBufReadExt, BufReader},
};

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];
const ZSTD_MAGIC: [u8; 4] = [0x28, 0xb5, 0x2f, 0xfd];

/// A decoded, line-readable input
pub type Source = Box<dyn AsyncBufRead + Unpin + Send>;

#[derive(thiserror::Error, Debug)]
/// Errors produced when opening an input
pub enum Error {
    /// The input could not be opened or read
    #[error("unable to open {path}: {source}")]
    Open {
        /// Path of the input
        path: String,
        /// Underlying IO error
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Compression applied to an input
pub enum Encoding {
    /// Plain text
    Identity,
    /// gzip, possibly multi-member
    Gzip,
    /// zstd, possibly multi-frame
    Zstd,
}

impl Encoding {
    /// Encoding implied by leading magic bytes, if recognisable
    #[must_use]
    pub fn sniff(head: &[u8]) -> Option<Self> {
        if head.starts_with(&ZSTD_MAGIC) {
            Some(Self::Zstd)
        } else if head.starts_with(&GZIP_MAGIC) {
            Some(Self::Gzip)
        } else {
            None
        }
    }

    /// Encoding implied by the file extension
    #[must_use]
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("gz" | "gzip") => Self::Gzip,
            Some("zst" | "zstd") => Self::Zstd,
            _ => Self::Identity,
        }
    }

    /// Wrap `reader` so that it yields decoded bytes
    #[must_use]
    pub fn decoder<R>(self, reader: R) -> Source
    where
        R: AsyncBufRead + Unpin + Send + 'static,
    {
        match self {
            Self::Identity => Box::new(reader),
            Self::Gzip => {
                let mut decoder = GzipDecoder::new(reader);
                decoder.multiple_members(true);
                Box::new(BufReader::new(decoder))
            }
            Self::Zstd => {
                let mut decoder = ZstdDecoder::new(reader);
                decoder.multiple_members(true);
                Box::new(BufReader::new(decoder))
            }
        }
    }
}

/// Open `path` for line reading, decoding as needed
///
/// # Errors
///
/// Function will error if the file cannot be opened or its first bytes
/// cannot be read.
pub async fn open(path: &Path) -> Result<(Encoding, Source), Error> {
    let wrap = |source| Error::Open {
        path: path.display().to_string(),
        source,
    };
    let file = fs::File::open(path).await.map_err(wrap)?;
    let mut reader = BufReader::new(file);
    let head = reader.fill_buf().await.map_err(wrap)?;
    let encoding = Encoding::sniff(head).unwrap_or_else(|| Encoding::from_path(path));
    Ok((encoding, encoding.decoder(reader)))
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use async_compression::tokio::bufread::ZstdEncoder;
    use flate2::{Compression, write::GzEncoder};
    use tokio::io::AsyncReadExt;

    use super::*;

    const TEXT: &str = "Europe,IT,Italy,GET,api.opencitations.net,/index/v1/x,200,ua,null,t\n";

    async fn read_all(path: &Path) -> (Encoding, String) {
        let (encoding, mut source) = open(path).await.expect("opens");
        let mut out = String::new();
        source.read_to_string(&mut out).await.expect("decodes");
        (encoding, out)
    }

    fn gzip(bytes: &[u8]) -> Vec<u8> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(bytes).expect("compress");
        encoder.finish().expect("finish")
    }

    async fn zstd(bytes: &[u8]) -> Vec<u8> {
        let mut encoder = ZstdEncoder::new(bytes);
        let mut out = Vec::new();
        encoder.read_to_end(&mut out).await.expect("compress");
        out
    }

    #[test]
    fn extension_detection() {
        assert_eq!(Encoding::from_path(Path::new("a.csv.gz")), Encoding::Gzip);
        assert_eq!(Encoding::from_path(Path::new("a.csv.zst")), Encoding::Zstd);
        assert_eq!(Encoding::from_path(Path::new("a.csv")), Encoding::Identity);
        assert_eq!(Encoding::from_path(Path::new("a")), Encoding::Identity);
    }

    #[tokio::test]
    async fn plain_text() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("oc-2024-01.csv");
        std::fs::write(&path, TEXT).expect("write");
        assert_eq!(read_all(&path).await, (Encoding::Identity, TEXT.to_string()));
    }

    #[tokio::test]
    async fn gzip_by_magic_regardless_of_name() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("oc-2024-01.csv");
        std::fs::write(&path, gzip(TEXT.as_bytes())).expect("write");
        assert_eq!(read_all(&path).await, (Encoding::Gzip, TEXT.to_string()));
    }

    #[tokio::test]
    async fn multi_member_gzip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("oc-2024-01.csv.gz");
        let mut bytes = gzip(TEXT.as_bytes());
        bytes.extend(gzip(TEXT.as_bytes()));
        std::fs::write(&path, bytes).expect("write");
        assert_eq!(read_all(&path).await.1, TEXT.repeat(2));
    }

    #[tokio::test]
    async fn multi_member_zstd() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("oc-2024-01.csv.zst");
        let mut bytes = zstd(TEXT.as_bytes()).await;
        bytes.extend(zstd(TEXT.as_bytes()).await);
        std::fs::write(&path, bytes).expect("write");
        assert_eq!(read_all(&path).await, (Encoding::Zstd, TEXT.repeat(2)));
    }

    #[tokio::test]
    async fn missing_file_is_an_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let err = open(&dir.path().join("absent.csv")).await.err();
        assert!(matches!(err, Some(Error::Open { .. })));
    }
}

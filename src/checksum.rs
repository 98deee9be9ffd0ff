use serde::{Deserialize, Serialize};
use sha3::{Digest, Sha3_256};

pub const DIGEST_LEN: usize = 32;

/// SHA3-256 digest of one block of a file, as recorded by the authority
/// when the file was written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockChecksum {
    pub offset: u64,
    pub length: u64,
    #[serde(with = "b64_digest")]
    pub digest: [u8; DIGEST_LEN],
}

pub fn sha3_256(data: &[u8]) -> [u8; DIGEST_LEN] {
    let mut hasher = Sha3_256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Accumulates per-block digests over a byte stream delivered in
/// arbitrarily sized chunks. Block boundaries are fixed by `block_size`,
/// independent of how the chunks were split.
pub struct BlockHasher {
    block_size: u64,
    hasher: Sha3_256,
    filled: u64,
    offset: u64,
    blocks: Vec<BlockChecksum>,
}

impl BlockHasher {
    pub fn new(block_size: u64) -> Self {
        assert!(block_size > 0, "block size must be positive");
        Self {
            block_size,
            hasher: Sha3_256::new(),
            filled: 0,
            offset: 0,
            blocks: Vec::new(),
        }
    }

    pub fn update(&mut self, mut data: &[u8]) {
        while !data.is_empty() {
            let room = (self.block_size - self.filled) as usize;
            let take = room.min(data.len());
            self.hasher.update(&data[..take]);
            self.filled += take as u64;
            data = &data[take..];
            if self.filled == self.block_size {
                self.seal_block();
            }
        }
    }

    pub fn finish(mut self) -> Vec<BlockChecksum> {
        if self.filled > 0 {
            self.seal_block();
        }
        self.blocks
    }

    fn seal_block(&mut self) {
        let digest = std::mem::take(&mut self.hasher).finalize().into();
        self.blocks.push(BlockChecksum {
            offset: self.offset,
            length: self.filled,
            digest,
        });
        self.offset += self.filled;
        self.filled = 0;
    }
}

mod b64_digest {
    use base64::{engine::general_purpose::STANDARD as base64, Engine};
    use serde::{Deserialize, Deserializer, Serializer};

    use super::DIGEST_LEN;

    pub fn serialize<S: Serializer>(digest: &[u8; DIGEST_LEN], ser: S) -> Result<S::Ok, S::Error> {
        ser.serialize_str(&base64.encode(digest))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<[u8; DIGEST_LEN], D::Error> {
        let s = String::deserialize(de)?;
        let bytes = base64.decode(&s).map_err(serde::de::Error::custom)?;
        bytes
            .try_into()
            .map_err(|_| serde::de::Error::custom("digest has wrong length"))
    }
}

#[cfg(test)]
mod tests {
    use super::{sha3_256, BlockChecksum, BlockHasher};

    #[test]
    fn test_empty_stream() {
        assert!(BlockHasher::new(4).finish().is_empty());
    }

    #[test]
    fn test_chunking_is_irrelevant() {
        let data = b"0123456789abcdef-";
        let mut whole = BlockHasher::new(8);
        whole.update(data);
        let mut split = BlockHasher::new(8);
        for chunk in data.chunks(3) {
            split.update(chunk);
        }
        assert_eq!(whole.finish(), split.finish());
    }

    #[test]
    fn test_block_layout() {
        let mut hasher = BlockHasher::new(8);
        hasher.update(b"0123456789abc");
        let blocks = hasher.finish();
        assert_eq!(blocks.len(), 2);
        assert_eq!((blocks[0].offset, blocks[0].length), (0, 8));
        assert_eq!((blocks[1].offset, blocks[1].length), (8, 5));
        assert_eq!(blocks[0].digest, sha3_256(b"01234567"));
        assert_eq!(blocks[1].digest, sha3_256(b"89abc"));
    }

    #[test]
    fn test_digest_roundtrip() {
        let block = BlockChecksum {
            offset: 0,
            length: 5,
            digest: sha3_256(b"89abc"),
        };
        let json = serde_json::to_string(&block).unwrap();
        assert_eq!(serde_json::from_str::<BlockChecksum>(&json).unwrap(), block);
    }
}

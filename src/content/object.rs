//! Crawled objects and their on-disk encoding

use crate::content::store::FsStore;
use crate::content::{StoreError, StoreResult};
use crate::operations::Response;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;

const MAGIC: &[u8; 4] = b"WAPC";
const VERSION: u8 = 1;

/// Type tag identifying what kind of value an object holds
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ContentType(String);

impl ContentType {
    pub fn new(tag: impl Into<String>) -> Self {
        Self(tag.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ContentType {
    fn from(tag: &str) -> Self {
        Self::new(tag)
    }
}

/// Values that have a natural key, used to assign their shard
pub trait Keyed {
    fn key(&self) -> String;
}

/// Serialization used for a stored value or its response metadata
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectEncoding {
    Json,
    Cbor,
}

impl ObjectEncoding {
    fn tag(self) -> u8 {
        match self {
            ObjectEncoding::Json => 1,
            ObjectEncoding::Cbor => 2,
        }
    }

    fn from_tag(tag: u8) -> StoreResult<Self> {
        match tag {
            1 => Ok(ObjectEncoding::Json),
            2 => Ok(ObjectEncoding::Cbor),
            other => Err(StoreError::Corrupt(format!("unknown encoding tag {}", other))),
        }
    }

    pub fn encode<T: Serialize + ?Sized>(self, value: &T) -> StoreResult<Vec<u8>> {
        match self {
            ObjectEncoding::Json => {
                serde_json::to_vec(value).map_err(|e| StoreError::Encode(e.to_string()))
            }
            ObjectEncoding::Cbor => {
                let mut buf = Vec::new();
                ciborium::ser::into_writer(value, &mut buf)
                    .map_err(|e| StoreError::Encode(e.to_string()))?;
                Ok(buf)
            }
        }
    }

    pub fn decode<T: DeserializeOwned>(self, bytes: &[u8]) -> StoreResult<T> {
        match self {
            ObjectEncoding::Json => {
                serde_json::from_slice(bytes).map_err(|e| StoreError::Decode(e.to_string()))
            }
            ObjectEncoding::Cbor => {
                ciborium::de::from_reader(bytes).map_err(|e| StoreError::Decode(e.to_string()))
            }
        }
    }
}

/// The unit handed downstream by a crawl: a typed value plus the response
/// metadata it was obtained with
#[derive(Debug, Clone, PartialEq)]
pub struct CrawledObject<V> {
    pub content_type: ContentType,
    pub value: V,
    pub response: Response,
}

impl<V> CrawledObject<V> {
    pub fn new(content_type: ContentType, value: V, response: Response) -> Self {
        Self {
            content_type,
            value,
            response,
        }
    }

    /// Attaches a checkpoint blob and progress counters
    pub fn with_checkpoint(mut self, checkpoint: Vec<u8>, current: i64, total: i64) -> Self {
        self.response.checkpoint = Some(checkpoint);
        self.response.current = current;
        self.response.total = total;
        self
    }
}

impl<V: Serialize> CrawledObject<V> {
    /// Encodes the object, value and response metadata separately
    pub fn encode(&self, value_encoding: ObjectEncoding, response_encoding: ObjectEncoding) -> StoreResult<Vec<u8>> {
        let value = value_encoding.encode(&self.value)?;
        let response = response_encoding.encode(&self.response)?;
        let tag = self.content_type.as_str().as_bytes();
        let tag_len = u16::try_from(tag.len())
            .map_err(|_| StoreError::Encode("content type tag too long".to_string()))?;

        let mut buf = Vec::with_capacity(16 + tag.len() + value.len() + response.len());
        buf.extend_from_slice(MAGIC);
        buf.push(VERSION);
        buf.push(value_encoding.tag());
        buf.push(response_encoding.tag());
        buf.extend_from_slice(&tag_len.to_be_bytes());
        buf.extend_from_slice(tag);
        write_section(&mut buf, &value)?;
        write_section(&mut buf, &response)?;
        Ok(buf)
    }

    /// Writes the object to `store` under `prefix/suffix`
    ///
    /// Storing the same object twice overwrites the earlier file.
    pub async fn store(
        &self,
        store: &FsStore,
        prefix: &str,
        suffix: &str,
        value_encoding: ObjectEncoding,
        response_encoding: ObjectEncoding,
    ) -> StoreResult<()> {
        let buf = self.encode(value_encoding, response_encoding)?;
        store.write(prefix, suffix, &buf).await
    }
}

impl<V: DeserializeOwned> CrawledObject<V> {
    pub fn decode(buf: &[u8]) -> StoreResult<Self> {
        let mut reader = Reader::new(buf)?;
        let header = reader.header()?;
        let value_bytes = reader.section()?;
        let response_bytes = reader.section()?;
        Ok(Self {
            content_type: header.content_type,
            value: header.value_encoding.decode(value_bytes)?,
            response: header.response_encoding.decode(response_bytes)?,
        })
    }

    /// Reads the object stored under `prefix/name`
    pub async fn load(store: &FsStore, prefix: &str, name: &str) -> StoreResult<Self> {
        let buf = store.read(prefix, name).await?;
        Self::decode(&buf)
    }
}

/// Returns the type tag of an encoded object without decoding its value
pub fn read_type(buf: &[u8]) -> StoreResult<ContentType> {
    Ok(Reader::new(buf)?.header()?.content_type)
}

fn write_section(buf: &mut Vec<u8>, section: &[u8]) -> StoreResult<()> {
    let len = u32::try_from(section.len())
        .map_err(|_| StoreError::Encode("object section too large".to_string()))?;
    buf.extend_from_slice(&len.to_be_bytes());
    buf.extend_from_slice(section);
    Ok(())
}

struct Header {
    content_type: ContentType,
    value_encoding: ObjectEncoding,
    response_encoding: ObjectEncoding,
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> StoreResult<Self> {
        if buf.len() < MAGIC.len() || &buf[..MAGIC.len()] != MAGIC {
            return Err(StoreError::Corrupt("missing object header".to_string()));
        }
        Ok(Self {
            buf,
            pos: MAGIC.len(),
        })
    }

    fn take(&mut self, n: usize) -> StoreResult<&'a [u8]> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|end| *end <= self.buf.len())
            .ok_or_else(|| StoreError::Corrupt("object file truncated".to_string()))?;
        let bytes = &self.buf[self.pos..end];
        self.pos = end;
        Ok(bytes)
    }

    fn header(&mut self) -> StoreResult<Header> {
        let fixed = self.take(5)?;
        if fixed[0] != VERSION {
            return Err(StoreError::Corrupt(format!("unsupported version {}", fixed[0])));
        }
        let value_encoding = ObjectEncoding::from_tag(fixed[1])?;
        let response_encoding = ObjectEncoding::from_tag(fixed[2])?;
        let tag_len = u16::from_be_bytes([fixed[3], fixed[4]]) as usize;
        let tag = std::str::from_utf8(self.take(tag_len)?)
            .map_err(|e| StoreError::Corrupt(e.to_string()))?;
        Ok(Header {
            content_type: ContentType::new(tag),
            value_encoding,
            response_encoding,
        })
    }

    fn section(&mut self) -> StoreResult<&'a [u8]> {
        let len = self.take(4)?;
        let len = u32::from_be_bytes([len[0], len[1], len[2], len[3]]) as usize;
        self.take(len)
    }
}

/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

//! The ZID cache: a persistent map of peer ZID to retained-secret
//! record. One cache serves every session of a process; all mutation
//! goes through the trait so implementations can serialize writers and
//! keep single-record updates atomic.

use std::collections::HashMap;
use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use rand::rngs::OsRng;
use rand::RngCore;
use zeroize::Zeroize;

use crate::error::ZrtpError;
use crate::proto::{RS_SIZE, ZID_SIZE};

/// 12-byte ZRTP endpoint identifier.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Zid([u8; ZID_SIZE]);

impl Zid {
    pub fn new(bytes: [u8; ZID_SIZE]) -> Self {
        Zid(bytes)
    }

    /// Panics if the slice is not exactly 12 bytes; callers pass
    /// fixed-size subslices of validated messages.
    pub fn from_slice(bytes: &[u8]) -> Self {
        let mut zid = [0u8; ZID_SIZE];
        zid.copy_from_slice(bytes);
        Zid(zid)
    }

    pub fn random() -> Self {
        let mut zid = [0u8; ZID_SIZE];
        OsRng.fill_bytes(&mut zid);
        Zid(zid)
    }

    pub fn as_bytes(&self) -> &[u8; ZID_SIZE] {
        &self.0
    }
}

impl std::fmt::Debug for Zid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Zid({})", hex::encode(self.0))
    }
}

/* Record flags */

pub const FLAG_VALID: u32 = 0x01;
pub const FLAG_SAS_VERIFIED: u32 = 0x02;
pub const FLAG_RS1_VALID: u32 = 0x04;
pub const FLAG_RS2_VALID: u32 = 0x08;
pub const FLAG_MITM_KEY: u32 = 0x10;

/// Default TTL written with a fresh RS1 (no expiry).
const RS_TTL_UNLIMITED: u32 = 0xffff_ffff;

/// Per-peer retained-secret record.
#[derive(Clone, PartialEq, Eq)]
pub struct ZidRecord {
    pub zid: Zid,
    pub flags: u32,
    pub rs1: [u8; RS_SIZE],
    pub rs1_last_use: i64,
    pub rs1_ttl: u32,
    pub rs2: [u8; RS_SIZE],
    pub rs2_last_use: i64,
    pub rs2_ttl: u32,
    pub mitm_key: [u8; RS_SIZE],
    pub mitm_last_use: i64,
    pub secure_since: i64,
    pub name: Option<String>,
}

impl ZidRecord {
    pub fn new(zid: Zid) -> Self {
        ZidRecord {
            zid,
            flags: 0,
            rs1: [0; RS_SIZE],
            rs1_last_use: 0,
            rs1_ttl: 0,
            rs2: [0; RS_SIZE],
            rs2_last_use: 0,
            rs2_ttl: 0,
            mitm_key: [0; RS_SIZE],
            mitm_last_use: 0,
            secure_since: 0,
            name: None,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.flags & FLAG_VALID != 0
    }
    pub fn set_valid(&mut self) {
        self.flags |= FLAG_VALID;
    }
    pub fn is_sas_verified(&self) -> bool {
        self.flags & FLAG_SAS_VERIFIED != 0
    }
    pub fn set_sas_verified(&mut self, verified: bool) {
        if verified {
            self.flags |= FLAG_SAS_VERIFIED;
        } else {
            self.flags &= !FLAG_SAS_VERIFIED;
        }
    }
    pub fn is_rs1_valid(&self) -> bool {
        self.flags & FLAG_RS1_VALID != 0
    }
    pub fn is_rs2_valid(&self) -> bool {
        self.flags & FLAG_RS2_VALID != 0
    }
    pub fn set_rs2_valid(&mut self) {
        self.flags |= FLAG_RS2_VALID;
    }
    pub fn is_mitm_key_available(&self) -> bool {
        self.flags & FLAG_MITM_KEY != 0
    }

    /// Rotate in a freshly derived retained secret: the old RS1 becomes
    /// RS2 (keeping its timestamps), `new_rs1` becomes RS1.
    pub fn set_new_rs1(&mut self, new_rs1: &[u8]) {
        if self.is_rs1_valid() {
            self.rs2 = self.rs1;
            self.rs2_last_use = self.rs1_last_use;
            self.rs2_ttl = self.rs1_ttl;
            self.flags |= FLAG_RS2_VALID;
        }
        let n = new_rs1.len().min(RS_SIZE);
        self.rs1 = [0; RS_SIZE];
        self.rs1[..n].copy_from_slice(&new_rs1[..n]);
        self.rs1_last_use = now_secs();
        self.rs1_ttl = RS_TTL_UNLIMITED;
        self.flags |= FLAG_RS1_VALID;
    }

    /// Written only on enrollment acceptance.
    pub fn set_mitm_key(&mut self, key: &[u8]) {
        let n = key.len().min(RS_SIZE);
        self.mitm_key = [0; RS_SIZE];
        self.mitm_key[..n].copy_from_slice(&key[..n]);
        self.mitm_last_use = now_secs();
        self.flags |= FLAG_MITM_KEY;
    }

    /// Fixed 152-byte persisted layout, name excluded.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(152);
        out.extend_from_slice(self.zid.as_bytes());
        out.extend_from_slice(&self.flags.to_be_bytes());
        out.extend_from_slice(&self.rs1);
        out.extend_from_slice(&self.rs1_last_use.to_be_bytes());
        out.extend_from_slice(&self.rs1_ttl.to_be_bytes());
        out.extend_from_slice(&self.rs2);
        out.extend_from_slice(&self.rs2_last_use.to_be_bytes());
        out.extend_from_slice(&self.rs2_ttl.to_be_bytes());
        out.extend_from_slice(&self.mitm_key);
        out.extend_from_slice(&self.mitm_last_use.to_be_bytes());
        out.extend_from_slice(&self.secure_since.to_be_bytes());
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < 152 {
            return None;
        }
        let mut at = 0usize;
        let zid = Zid::from_slice(&bytes[at..at + ZID_SIZE]);
        at += ZID_SIZE;
        let flags = u32::from_be_bytes(bytes[at..at + 4].try_into().unwrap());
        at += 4;
        let mut rec = ZidRecord::new(zid);
        rec.flags = flags;
        rec.rs1.copy_from_slice(&bytes[at..at + RS_SIZE]);
        at += RS_SIZE;
        rec.rs1_last_use = i64::from_be_bytes(bytes[at..at + 8].try_into().unwrap());
        at += 8;
        rec.rs1_ttl = u32::from_be_bytes(bytes[at..at + 4].try_into().unwrap());
        at += 4;
        rec.rs2.copy_from_slice(&bytes[at..at + RS_SIZE]);
        at += RS_SIZE;
        rec.rs2_last_use = i64::from_be_bytes(bytes[at..at + 8].try_into().unwrap());
        at += 8;
        rec.rs2_ttl = u32::from_be_bytes(bytes[at..at + 4].try_into().unwrap());
        at += 4;
        rec.mitm_key.copy_from_slice(&bytes[at..at + RS_SIZE]);
        at += RS_SIZE;
        rec.mitm_last_use = i64::from_be_bytes(bytes[at..at + 8].try_into().unwrap());
        at += 8;
        rec.secure_since = i64::from_be_bytes(bytes[at..at + 8].try_into().unwrap());
        Some(rec)
    }
}

impl Drop for ZidRecord {
    fn drop(&mut self) {
        self.rs1.zeroize();
        self.rs2.zeroize();
        self.mitm_key.zeroize();
    }
}

pub(crate) fn now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// Abstract contract the engine consumes. Implementations must keep
/// single-record updates atomic and serialize concurrent writers;
/// callers hold the cache behind a mutex and never retain references
/// into it across calls.
pub trait ZidCache: Send {
    /// The ZID this endpoint sends in its Hello.
    fn local_zid(&self) -> Zid;

    /// Return the record for a peer, creating a fresh Valid record with
    /// `secure_since = now` on first contact. Refuses the local ZID.
    fn get_record(&mut self, peer: &Zid) -> Result<ZidRecord, ZrtpError>;

    /// Persist a mutated record.
    fn save_record(&mut self, record: &ZidRecord) -> Result<(), ZrtpError>;

    fn get_peer_name(&self, peer: &Zid) -> Option<String>;

    fn put_peer_name(&mut self, peer: &Zid, name: &str);

    /// Snapshot of all valid records, for management UIs.
    fn read_all(&self) -> Vec<ZidRecord>;

    /// Release any backing resources. Further calls may fail.
    fn close(&mut self) {}
}

/* In-memory implementation */

/// Cache without persistence; fine for tests and for hosts that accept
/// losing key continuity across restarts.
pub struct InMemoryZidCache {
    local: Zid,
    records: HashMap<Zid, ZidRecord>,
}

impl InMemoryZidCache {
    pub fn new() -> Self {
        InMemoryZidCache { local: Zid::random(), records: HashMap::new() }
    }

    pub fn with_local_zid(local: Zid) -> Self {
        InMemoryZidCache { local, records: HashMap::new() }
    }
}

impl Default for InMemoryZidCache {
    fn default() -> Self {
        Self::new()
    }
}

impl ZidCache for InMemoryZidCache {
    fn local_zid(&self) -> Zid {
        self.local
    }

    fn get_record(&mut self, peer: &Zid) -> Result<ZidRecord, ZrtpError> {
        if *peer == self.local {
            return Err(ZrtpError::Cache("record lookup with own ZID".into()));
        }
        Ok(self
            .records
            .entry(*peer)
            .or_insert_with(|| {
                let mut rec = ZidRecord::new(*peer);
                rec.set_valid();
                rec.secure_since = now_secs();
                rec
            })
            .clone())
    }

    fn save_record(&mut self, record: &ZidRecord) -> Result<(), ZrtpError> {
        self.records.insert(record.zid, record.clone());
        Ok(())
    }

    fn get_peer_name(&self, peer: &Zid) -> Option<String> {
        self.records.get(peer).and_then(|r| r.name.clone())
    }

    fn put_peer_name(&mut self, peer: &Zid, name: &str) {
        if let Some(rec) = self.records.get_mut(peer) {
            rec.name = Some(name.to_string());
        }
    }

    fn read_all(&self) -> Vec<ZidRecord> {
        self.records.values().filter(|r| r.is_valid()).cloned().collect()
    }
}

/* File-backed implementation */

const FILE_MAGIC: &[u8; 8] = b"ZRTPZID1";

/// Simple file-backed cache: the whole map is loaded at open and the
/// file is rewritten through a temp-file rename on every save, which
/// keeps record updates atomic.
pub struct FileZidCache {
    path: PathBuf,
    local: Zid,
    records: HashMap<Zid, ZidRecord>,
}

impl FileZidCache {
    /// Open the cache, creating it (and the local ZID) on first use.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, ZrtpError> {
        let path = path.as_ref().to_path_buf();
        if path.exists() {
            let mut data = Vec::new();
            fs::File::open(&path)
                .and_then(|mut f| f.read_to_end(&mut data))
                .map_err(|e| ZrtpError::Cache(e.to_string()))?;
            Self::decode(path, &data)
        } else {
            let cache =
                FileZidCache { path, local: Zid::random(), records: HashMap::new() };
            cache.flush()?;
            Ok(cache)
        }
    }

    fn decode(path: PathBuf, data: &[u8]) -> Result<Self, ZrtpError> {
        if data.len() < FILE_MAGIC.len() + ZID_SIZE || &data[..8] != FILE_MAGIC {
            return Err(ZrtpError::Cache("unrecognized cache file".into()));
        }
        let local = Zid::from_slice(&data[8..8 + ZID_SIZE]);
        let mut records = HashMap::new();
        let mut at = 8 + ZID_SIZE;
        while at + 152 + 2 <= data.len() {
            let rec = ZidRecord::from_bytes(&data[at..at + 152])
                .ok_or_else(|| ZrtpError::Cache("truncated record".into()))?;
            at += 152;
            let name_len =
                u16::from_be_bytes(data[at..at + 2].try_into().unwrap()) as usize;
            at += 2;
            if at + name_len > data.len() {
                return Err(ZrtpError::Cache("truncated name record".into()));
            }
            let mut rec = rec;
            if name_len > 0 {
                rec.name =
                    Some(String::from_utf8_lossy(&data[at..at + name_len]).into_owned());
            }
            at += name_len;
            records.insert(rec.zid, rec);
        }
        Ok(FileZidCache { path, local, records })
    }

    fn flush(&self) -> Result<(), ZrtpError> {
        let mut out = Vec::new();
        out.extend_from_slice(FILE_MAGIC);
        out.extend_from_slice(self.local.as_bytes());
        for rec in self.records.values() {
            out.extend_from_slice(&rec.to_bytes());
            let name = rec.name.as_deref().unwrap_or("");
            let name = &name.as_bytes()[..name.len().min(200)];
            out.extend_from_slice(&(name.len() as u16).to_be_bytes());
            out.extend_from_slice(name);
        }
        let tmp = self.path.with_extension("tmp");
        fs::File::create(&tmp)
            .and_then(|mut f| f.write_all(&out))
            .and_then(|_| fs::rename(&tmp, &self.path))
            .map_err(|e| ZrtpError::Cache(e.to_string()))
    }
}

impl ZidCache for FileZidCache {
    fn local_zid(&self) -> Zid {
        self.local
    }

    fn get_record(&mut self, peer: &Zid) -> Result<ZidRecord, ZrtpError> {
        if *peer == self.local {
            return Err(ZrtpError::Cache("record lookup with own ZID".into()));
        }
        if let Some(rec) = self.records.get(peer) {
            return Ok(rec.clone());
        }
        let mut rec = ZidRecord::new(*peer);
        rec.set_valid();
        rec.secure_since = now_secs();
        self.records.insert(*peer, rec.clone());
        self.flush()?;
        Ok(rec)
    }

    fn save_record(&mut self, record: &ZidRecord) -> Result<(), ZrtpError> {
        self.records.insert(record.zid, record.clone());
        self.flush()
    }

    fn get_peer_name(&self, peer: &Zid) -> Option<String> {
        self.records.get(peer).and_then(|r| r.name.clone())
    }

    fn put_peer_name(&mut self, peer: &Zid, name: &str) {
        if let Some(rec) = self.records.get_mut(peer) {
            rec.name = Some(name.chars().take(200).collect());
            let _ = self.flush();
        }
    }

    fn read_all(&self) -> Vec<ZidRecord> {
        self.records.values().filter(|r| r.is_valid()).cloned().collect()
    }

    fn close(&mut self) {
        let _ = self.flush();
        self.records.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_record_is_valid_with_secure_since() {
        let mut cache = InMemoryZidCache::new();
        let peer = Zid::random();
        let rec = cache.get_record(&peer).unwrap();
        assert!(rec.is_valid());
        assert!(rec.secure_since > 0);
        assert!(!rec.is_rs1_valid());
    }

    #[test]
    fn own_zid_is_refused() {
        let mut cache = InMemoryZidCache::new();
        let own = cache.local_zid();
        assert!(cache.get_record(&own).is_err());
    }

    #[test]
    fn rs1_rotation_moves_old_secret_to_rs2() {
        let mut rec = ZidRecord::new(Zid::random());
        rec.set_valid();
        rec.set_new_rs1(&[1u8; 32]);
        assert!(rec.is_rs1_valid());
        assert!(!rec.is_rs2_valid());
        rec.set_new_rs1(&[2u8; 32]);
        assert!(rec.is_rs2_valid());
        assert_eq!(rec.rs2, [1u8; 32]);
        assert_eq!(rec.rs1, [2u8; 32]);
    }

    #[test]
    fn sas_verified_is_sticky_across_rotation() {
        let mut rec = ZidRecord::new(Zid::random());
        rec.set_sas_verified(true);
        rec.set_new_rs1(&[3u8; 32]);
        assert!(rec.is_sas_verified());
        rec.set_sas_verified(false);
        assert!(!rec.is_sas_verified());
    }

    #[test]
    fn record_bytes_roundtrip() {
        let mut rec = ZidRecord::new(Zid::random());
        rec.set_valid();
        rec.set_new_rs1(&[7u8; 32]);
        rec.set_mitm_key(&[9u8; 32]);
        rec.secure_since = 1234567;
        let bytes = rec.to_bytes();
        assert_eq!(bytes.len(), 152);
        let back = ZidRecord::from_bytes(&bytes).unwrap();
        assert_eq!(back.zid, rec.zid);
        assert_eq!(back.flags, rec.flags);
        assert_eq!(back.rs1, rec.rs1);
        assert_eq!(back.mitm_key, rec.mitm_key);
        assert_eq!(back.secure_since, rec.secure_since);
    }

    #[test]
    fn file_cache_persists_records() {
        let dir = std::env::temp_dir().join(format!("zidcache-{}", std::process::id()));
        let _ = fs::remove_file(&dir);
        {
            let mut cache = FileZidCache::open(&dir).unwrap();
            let peer = Zid::new([5u8; 12]);
            let mut rec = cache.get_record(&peer).unwrap();
            rec.set_new_rs1(&[0xaa; 32]);
            cache.save_record(&rec).unwrap();
            cache.put_peer_name(&peer, "alice");
        }
        {
            let mut cache = FileZidCache::open(&dir).unwrap();
            let peer = Zid::new([5u8; 12]);
            let rec = cache.get_record(&peer).unwrap();
            assert!(rec.is_rs1_valid());
            assert_eq!(rec.rs1, [0xaa; 32]);
            assert_eq!(cache.get_peer_name(&peer).as_deref(), Some("alice"));
        }
        let _ = fs::remove_file(&dir);
    }
}

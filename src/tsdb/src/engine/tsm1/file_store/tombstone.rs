use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};

use bytes::BufMut;
use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncReadExt, BufReader};
use tsmdb_storage::file::{sync_dir, WritableFile};
use tsmdb_storage::Writable;

use crate::engine::tsm1::file_store::stat::TombstoneStat;
use crate::engine::tsm1::file_store::{TimeRange, MAX_KEY_LENGTH};
use crate::engine::tsm1::value::Values;
use crate::error::{io_err, Error, Result};
use crate::TOMBSTONE_FILE_EXTENSION;

/// Every tombstone file starts with this header. Records follow:
/// `| key len(4B) | key | min(8B) | max(8B) | crc32(4B) |`, the crc covering the preceding fields.
pub(crate) const TOMBSTONE_HEADER: u32 = 0x1504;

const HEADER_SIZE: usize = 4;
const RECORD_FIXED_SIZE: usize = 4 + 8 + 8 + 4;

/// Tombstone represents an individual deletion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tombstone {
    /// key is the tombstoned series key.
    pub key: Vec<u8>,

    /// min and max are the inclusive unix nanosecond bounds of the deleted points.
    pub min: i64,
    pub max: i64,
}

impl Tombstone {
    pub fn new(key: Vec<u8>, min: i64, max: i64) -> Self {
        Self { key, min, max }
    }

    pub fn time_range(&self) -> TimeRange {
        TimeRange::new(self.min, self.max)
    }

    fn append_to(&self, b: &mut Vec<u8>) {
        let start = b.len();
        b.put_u32(self.key.len() as u32);
        b.put_slice(&self.key);
        b.put_i64(self.min);
        b.put_i64(self.max);
        let crc = crc32fast::hash(&b[start..]);
        b.put_u32(crc);
    }
}

/// tombstone_path returns the tombstone file belonging to a TSM file: the extension is replaced.
pub fn tombstone_path(tsm_path: impl AsRef<Path>) -> PathBuf {
    tsm_path.as_ref().with_extension(TOMBSTONE_FILE_EXTENSION)
}

/// Tombstoner records tombstones when entries are deleted. Appends are not synchronized,
/// the owner of a Tombstoner serializes them.
#[derive(Debug, Clone)]
pub struct Tombstoner {
    /// path of the TSM file the tombstones apply to.
    tsm_path: PathBuf,
    path: PathBuf,
}

impl Tombstoner {
    pub fn new(tsm_path: impl AsRef<Path>) -> Self {
        let tsm_path = tsm_path.as_ref().to_path_buf();
        let path = if tsm_path
            .extension()
            .map(|x| x == TOMBSTONE_FILE_EXTENSION)
            .unwrap_or_default()
        {
            tsm_path.clone()
        } else {
            tombstone_path(&tsm_path)
        };

        Self { tsm_path, path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn tsm_path(&self) -> &Path {
        &self.tsm_path
    }

    /// has_tombstones returns true if there are any tombstone entries recorded.
    pub async fn has_tombstones(&self) -> bool {
        match tokio::fs::metadata(&self.path).await {
            Ok(m) => m.len() > HEADER_SIZE as u64,
            Err(_) => false,
        }
    }

    /// add adds the all keys, across all timestamps, to the tombstone.
    pub async fn add<K: AsRef<[u8]> + Sync>(&self, keys: &[K]) -> Result<()> {
        self.add_range(keys, i64::MIN, i64::MAX).await
    }

    /// add_range appends one entry per key and fsyncs the file. Existing entries are never rewritten.
    pub async fn add_range<K: AsRef<[u8]> + Sync>(&self, keys: &[K], min: i64, max: i64) -> Result<()> {
        if keys.is_empty() {
            return Ok(());
        }

        let mut buf = Vec::with_capacity(HEADER_SIZE + keys.len() * (RECORD_FIXED_SIZE + 32));
        for key in keys {
            let key = key.as_ref();
            if key.len() > MAX_KEY_LENGTH {
                return Err(Error::MaxKeyLengthExceeded(key.len()));
            }
            Tombstone::new(key.to_vec(), min, max).append_to(&mut buf);
        }

        let mut f = WritableFile::open_append(&self.path)
            .await
            .map_err(io_err(&self.path))?;
        let start = f.size();
        let created = start == 0;

        let res = async {
            if created {
                f.append(&TOMBSTONE_HEADER.to_be_bytes()).await?;
            }
            f.append(&buf).await?;
            f.sync().await
        }
        .await;
        if let Err(e) = res {
            // cut back so that the entries appended later stay readable
            if let Err(te) = f.truncate(start).await {
                warn!("failed to roll back tombstone file {:?}: {}", self.path, te);
            }
            return Err(io_err(&self.path)(e));
        }

        if created {
            if let Some(dir) = self.path.parent() {
                sync_dir(dir).await.map_err(io_err(dir))?;
            }
        }

        Ok(())
    }

    /// walk calls f for every entry in append order and returns the number of entries visited.
    /// A visitor error, a bad header or a corrupt entry stops the walk with
    /// [`Error::TombstoneWalk`] carrying the count of entries processed successfully.
    pub async fn walk<F>(&self, f: F) -> Result<u64>
    where
        F: FnMut(&Tombstone) -> anyhow::Result<()>,
    {
        self.scan(f).await.map_err(|(e, _)| e)
    }

    /// scan is walk that also reports, on failure, the length of the file prefix holding the
    /// header and the entries read successfully.
    async fn scan<F>(&self, mut f: F) -> std::result::Result<u64, (Error, u64)>
    where
        F: FnMut(&Tombstone) -> anyhow::Result<()>,
    {
        let fd = match File::open(&self.path).await {
            Ok(fd) => fd,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err((io_err(&self.path)(e), 0)),
        };
        let mut r = BufReader::new(fd);

        let walk_err = |processed: u64, good: u64, reason: String| {
            (
                Error::TombstoneWalk {
                    path: self.path.clone(),
                    processed,
                    reason,
                },
                good,
            )
        };

        let mut header = [0u8; HEADER_SIZE];
        match read_full(&mut r, &mut header).await {
            Ok(0) => return Ok(0),
            Ok(HEADER_SIZE) => {}
            Ok(_) => return Err(walk_err(0, 0, "truncated header".to_string())),
            Err(e) => return Err(walk_err(0, 0, e.to_string())),
        }
        let header = u32::from_be_bytes(header);
        if header != TOMBSTONE_HEADER {
            return Err(walk_err(
                0,
                0,
                format!("incompatible tombstone version {:#x}", header),
            ));
        }

        let mut processed = 0;
        let mut good = HEADER_SIZE as u64;
        let mut record = Vec::with_capacity(RECORD_FIXED_SIZE + 64);
        loop {
            match read_entry(&mut r, &mut record).await {
                Ok(Some(t)) => {
                    f(&t).map_err(|e| walk_err(processed, good, e.to_string()))?;
                    processed += 1;
                    good += record.len() as u64;
                }
                Ok(None) => return Ok(processed),
                Err(e) => return Err(walk_err(processed, good, e.to_string())),
            }
        }
    }

    /// read_all loads every entry of the file.
    pub async fn read_all(&self) -> Result<Vec<Tombstone>> {
        let mut tombstones = vec![];
        self.walk(|t| {
            tombstones.push(t.clone());
            Ok(())
        })
        .await?;
        Ok(tombstones)
    }

    /// load returns the readable entries of the file. A corrupt or torn entry, such as one
    /// left by a crash in the middle of an append, ends them: the entries before it are
    /// returned along with the length of the readable prefix, for [`Tombstoner::truncate`]
    /// to cut the damage off before the next append. The file itself is left untouched.
    pub async fn load(&self) -> Result<(Vec<Tombstone>, Option<u64>)> {
        let mut tombstones = vec![];
        let res = self
            .scan(|t| {
                tombstones.push(t.clone());
                Ok(())
            })
            .await;

        match res {
            Ok(_) => Ok((tombstones, None)),
            Err((Error::TombstoneWalk { processed, reason, .. }, good)) => {
                warn!(
                    "tombstone file {:?} is damaged after {} entries, ignoring the rest: {}",
                    self.path, processed, reason
                );
                Ok((tombstones, Some(good)))
            }
            Err((e, _)) => Err(e),
        }
    }

    /// truncate cuts the file back to len bytes and syncs it.
    pub async fn truncate(&self, len: u64) -> Result<()> {
        let mut f = WritableFile::open_append(&self.path)
            .await
            .map_err(io_err(&self.path))?;
        f.truncate(len).await.map_err(io_err(&self.path))?;
        f.sync().await.map_err(io_err(&self.path))
    }

    /// delete removes the tombstone file, a missing file is not an error.
    pub async fn delete(&self) -> Result<()> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_err(&self.path)(e)),
        }
    }

    pub async fn stat(&self) -> Result<TombstoneStat> {
        let m = match tokio::fs::metadata(&self.path).await {
            Ok(m) => m,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Ok(TombstoneStat {
                    path: self.path.clone(),
                    ..Default::default()
                })
            }
            Err(e) => return Err(io_err(&self.path)(e)),
        };

        let last_modified = m
            .modified()
            .ok()
            .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
            .map(|d| d.as_nanos() as i64)
            .unwrap_or_default();

        Ok(TombstoneStat {
            tombstone_exists: true,
            path: self.path.clone(),
            last_modified,
            size: m.len(),
        })
    }
}

/// read_full fills buf until EOF and returns the number of bytes read.
async fn read_full<R: AsyncRead + Unpin>(r: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut n = 0;
    while n < buf.len() {
        let m = r.read(&mut buf[n..]).await?;
        if m == 0 {
            break;
        }
        n += m;
    }
    Ok(n)
}

async fn read_entry<R: AsyncRead + Unpin>(
    r: &mut R,
    record: &mut Vec<u8>,
) -> anyhow::Result<Option<Tombstone>> {
    let mut key_len = [0u8; 4];
    match read_full(r, &mut key_len).await? {
        0 => return Ok(None),
        4 => {}
        n => return Err(anyhow!("truncated entry: {} of 4 length bytes", n)),
    }

    let len = u32::from_be_bytes(key_len) as usize;
    if len > MAX_KEY_LENGTH {
        return Err(anyhow!("invalid key length {}", len));
    }

    record.clear();
    record.extend_from_slice(&key_len);
    record.resize(4 + len + 8 + 8 + 4, 0);
    let want = record.len() - 4;
    let n = read_full(r, &mut record[4..]).await?;
    if n < want {
        return Err(anyhow!("truncated entry: {} of {} bytes", n, want));
    }

    let body = &record[..record.len() - 4];
    let expected = u32::from_be_bytes(record[record.len() - 4..].try_into()?);
    let actual = crc32fast::hash(body);
    if expected != actual {
        return Err(anyhow!(
            "checksum mismatch: got {} but expected {}",
            actual,
            expected
        ));
    }

    let key = body[4..4 + len].to_vec();
    let min = i64::from_be_bytes(body[4 + len..12 + len].try_into()?);
    let max = i64::from_be_bytes(body[12 + len..20 + len].try_into()?);

    Ok(Some(Tombstone::new(key, min, max)))
}

/// combine_ranges sorts the ranges and coalesces the ones that overlap or touch.
/// Inverted ranges (min > max) cover nothing and are dropped.
pub fn combine_ranges(mut ranges: Vec<TimeRange>) -> Vec<TimeRange> {
    ranges.retain(|r| r.min <= r.max);
    if ranges.len() <= 1 {
        return ranges;
    }

    ranges.sort_by_key(|r| (r.min, r.max));

    let mut out: Vec<TimeRange> = Vec::with_capacity(ranges.len());
    for r in ranges {
        match out.last_mut() {
            Some(last) if r.min <= last.max.saturating_add(1) => {
                last.max = last.max.max(r.max);
            }
            _ => out.push(r),
        }
    }
    out
}

/// TombstoneSet holds the combined deleted ranges of every tombstoned key.
#[derive(Debug, Clone, Default)]
pub struct TombstoneSet {
    ranges: HashMap<Vec<u8>, Vec<TimeRange>>,
}

impl TombstoneSet {
    pub fn new(tombstones: impl IntoIterator<Item = Tombstone>) -> Self {
        let mut set = Self::default();
        for t in tombstones {
            set.add(t);
        }
        set
    }

    pub fn add(&mut self, t: Tombstone) {
        let ranges = self.ranges.entry(t.key).or_default();
        ranges.push(TimeRange::new(t.min, t.max));
        let combined = combine_ranges(std::mem::take(ranges));
        *ranges = combined;
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    /// ranges returns the combined deleted ranges of key, sorted by min time.
    pub fn ranges(&self, key: &[u8]) -> &[TimeRange] {
        self.ranges.get(key).map(|x| x.as_slice()).unwrap_or(&[])
    }

    /// covers returns true if the point of key at t is deleted.
    pub fn covers(&self, key: &[u8], t: i64) -> bool {
        let ranges = self.ranges(key);
        let i = ranges.partition_point(|r| r.max < t);
        i < ranges.len() && ranges[i].min <= t
    }

    /// covers_range returns true if every point of key within [min, max] is deleted.
    pub fn covers_range(&self, key: &[u8], min: i64, max: i64) -> bool {
        self.ranges(key).iter().any(|r| r.min <= min && r.max >= max)
    }

    /// apply drops the deleted points of key from values.
    pub fn apply(&self, key: &[u8], mut values: Values) -> Values {
        for r in self.ranges(key) {
            values = values.exclude(r.min, r.max);
        }
        values
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::AsyncWriteExt;

    use crate::engine::tsm1::value::Value;

    use super::*;

    #[test]
    fn test_tombstone_path() {
        assert_eq!(
            tombstone_path("/data/000000001-000000002.tsm"),
            PathBuf::from("/data/000000001-000000002.tombstone")
        );
        let ts = Tombstoner::new("/data/000000001-000000002.tombstone");
        assert_eq!(ts.path(), Path::new("/data/000000001-000000002.tombstone"));
    }

    #[tokio::test]
    async fn test_tombstoner_add_and_walk() {
        let dir = tempfile::tempdir().unwrap();
        let ts = Tombstoner::new(dir.as_ref().join("000000001-000000001.tsm"));

        assert!(!ts.has_tombstones().await);
        assert_eq!(ts.walk(|_| Ok(())).await.unwrap(), 0);
        assert!(!ts.stat().await.unwrap().tombstone_exists);

        ts.add(&[b"cpu"]).await.unwrap();
        ts.add_range(&[b"mem".as_slice(), b"disk".as_slice()], 5, 10).await.unwrap();
        assert!(ts.has_tombstones().await);

        let got = ts.read_all().await.unwrap();
        assert_eq!(
            got,
            vec![
                Tombstone::new(b"cpu".to_vec(), i64::MIN, i64::MAX),
                Tombstone::new(b"mem".to_vec(), 5, 10),
                Tombstone::new(b"disk".to_vec(), 5, 10),
            ]
        );

        let stat = ts.stat().await.unwrap();
        assert!(stat.tombstone_exists);
        assert!(stat.size > 4);

        ts.delete().await.unwrap();
        assert!(!ts.has_tombstones().await);
        ts.delete().await.unwrap();
    }

    #[tokio::test]
    async fn test_tombstoner_walk_visitor_error() {
        let dir = tempfile::tempdir().unwrap();
        let ts = Tombstoner::new(dir.as_ref().join("000000001-000000001.tsm"));
        ts.add_range(&[b"a", b"b", b"c"], 0, 1).await.unwrap();

        let mut seen = 0;
        let err = ts
            .walk(|t| {
                if t.key == b"c" {
                    return Err(anyhow!("bad key"));
                }
                seen += 1;
                Ok(())
            })
            .await
            .unwrap_err();

        assert_eq!(seen, 2);
        match err {
            Error::TombstoneWalk { processed, .. } => assert_eq!(processed, 2),
            e => panic!("unexpected error {}", e),
        }
    }

    #[tokio::test]
    async fn test_tombstoner_walk_corrupt_tail() {
        let dir = tempfile::tempdir().unwrap();
        let ts = Tombstoner::new(dir.as_ref().join("000000001-000000001.tsm"));
        ts.add_range(&[b"cpu", b"mem"], 0, 1).await.unwrap();

        // a torn record after two good ones
        let mut f = tokio::fs::OpenOptions::new()
            .append(true)
            .open(ts.path())
            .await
            .unwrap();
        f.write_all(&[0, 0, 0, 3, b'n', b'e']).await.unwrap();
        f.sync_all().await.unwrap();

        let err = ts.walk(|_| Ok(())).await.unwrap_err();
        match err {
            Error::TombstoneWalk { processed, reason, .. } => {
                assert_eq!(processed, 2);
                assert!(reason.contains("truncated"), "{}", reason);
            }
            e => panic!("unexpected error {}", e),
        }
    }

    #[tokio::test]
    async fn test_tombstoner_load_torn_tail() {
        let dir = tempfile::tempdir().unwrap();
        let ts = Tombstoner::new(dir.as_ref().join("000000001-000000001.tsm"));
        ts.add_range(&[b"cpu"], 1, 1).await.unwrap();
        let good = ts.stat().await.unwrap().size;

        // a crash in the middle of the next append
        let mut f = tokio::fs::OpenOptions::new()
            .append(true)
            .open(ts.path())
            .await
            .unwrap();
        f.write_all(&[0, 0, 0, 3, b'c']).await.unwrap();
        f.sync_all().await.unwrap();

        let (tombstones, damaged_at) = ts.load().await.unwrap();
        assert_eq!(tombstones, vec![Tombstone::new(b"cpu".to_vec(), 1, 1)]);
        assert_eq!(damaged_at, Some(good));
        // loading leaves the file as it is
        assert!(ts.walk(|_| Ok(())).await.is_err());

        ts.truncate(good).await.unwrap();
        ts.add_range(&[b"mem"], 2, 3).await.unwrap();
        assert_eq!(
            ts.read_all().await.unwrap(),
            vec![
                Tombstone::new(b"cpu".to_vec(), 1, 1),
                Tombstone::new(b"mem".to_vec(), 2, 3),
            ]
        );
        assert_eq!(ts.load().await.unwrap().1, None);
    }

    #[tokio::test]
    async fn test_tombstoner_load_bad_header() {
        let dir = tempfile::tempdir().unwrap();
        let ts = Tombstoner::new(dir.as_ref().join("000000001-000000001.tsm"));
        tokio::fs::write(ts.path(), [0x15, 0x04, 0x00]).await.unwrap();

        let (tombstones, damaged_at) = ts.load().await.unwrap();
        assert!(tombstones.is_empty());
        assert_eq!(damaged_at, Some(0));

        // an emptied file gets a fresh header on the next append
        ts.truncate(0).await.unwrap();
        ts.add(&[b"cpu"]).await.unwrap();
        assert_eq!(ts.read_all().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_tombstoner_walk_bad_checksum() {
        let dir = tempfile::tempdir().unwrap();
        let ts = Tombstoner::new(dir.as_ref().join("000000001-000000001.tsm"));
        ts.add_range(&[b"cpu"], 0, 1).await.unwrap();

        let mut data = tokio::fs::read(ts.path()).await.unwrap();
        let n = data.len();
        data[n - 6] ^= 0xFF;
        tokio::fs::write(ts.path(), &data).await.unwrap();

        match ts.walk(|_| Ok(())).await.unwrap_err() {
            Error::TombstoneWalk { processed, .. } => assert_eq!(processed, 0),
            e => panic!("unexpected error {}", e),
        }
    }

    #[tokio::test]
    async fn test_tombstoner_bad_header() {
        let dir = tempfile::tempdir().unwrap();
        let ts = Tombstoner::new(dir.as_ref().join("000000001-000000001.tsm"));
        tokio::fs::write(ts.path(), &0x1503u32.to_be_bytes())
            .await
            .unwrap();
        assert!(ts.walk(|_| Ok(())).await.is_err());
    }

    #[test]
    fn test_combine_ranges() {
        let got = combine_ranges(vec![
            TimeRange::new(10, 20),
            TimeRange::new(0, 5),
            TimeRange::new(21, 25),
            TimeRange::new(15, 18),
            TimeRange::new(40, 50),
            TimeRange::new(7, 3),
        ]);
        assert_eq!(
            got,
            vec![
                TimeRange::new(0, 5),
                TimeRange::new(10, 25),
                TimeRange::new(40, 50)
            ]
        );

        let got = combine_ranges(vec![TimeRange::unbound(), TimeRange::new(i64::MAX, i64::MAX)]);
        assert_eq!(got, vec![TimeRange::unbound()]);

        assert!(combine_ranges(vec![TimeRange::new(7, 3)]).is_empty());
        assert_eq!(
            combine_ranges(vec![TimeRange::new(1, 2)]),
            vec![TimeRange::new(1, 2)]
        );
    }

    #[test]
    fn test_tombstone_set() {
        let set = TombstoneSet::new(vec![
            Tombstone::new(b"cpu".to_vec(), 1, 1),
            Tombstone::new(b"cpu".to_vec(), 5, 7),
            Tombstone::new(b"mem".to_vec(), i64::MIN, i64::MAX),
        ]);

        assert!(set.covers(b"cpu", 1));
        assert!(!set.covers(b"cpu", 2));
        assert!(set.covers(b"cpu", 6));
        assert!(!set.covers(b"cpu", 8));
        assert!(set.covers(b"mem", 0));
        assert!(!set.covers(b"disk", 1));
        assert!(set.covers_range(b"cpu", 5, 7));
        assert!(!set.covers_range(b"cpu", 1, 5));

        let values = Values::Float(vec![
            Value::new(1, 1.0),
            Value::new(2, 2.0),
            Value::new(6, 6.0),
            Value::new(8, 8.0),
        ]);
        assert_eq!(
            set.apply(b"cpu", values.clone()),
            Values::Float(vec![Value::new(2, 2.0), Value::new(8, 8.0)])
        );
        assert_eq!(set.apply(b"disk", values.clone()), values);
        assert!(set.apply(b"mem", values).is_empty());
    }
}

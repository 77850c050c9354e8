//! Durable committed positions for consumer groups.
//!
//! Each group owns one text file under `<root>/groups/`, rewritten on
//! every commit via a temp file and an atomic rename. The format is the
//! portable representation of a group's progress:
//!
//! ```text
//! # brook-offsets v1
//! <stream>\t<partition>\t<offset>
//! ```
//!
//! Rows are sorted, one per `(stream, partition)` the group has
//! committed on. The committed offset is the next offset the group
//! would read.

use std::collections::HashMap;
use std::path::PathBuf;

use tokio::sync::Mutex;
use tracing::trace;

use brook_core::{GroupName, LogPartition, StreamError, StreamName, StreamResult};

const FORMAT_HEADER: &str = "# brook-offsets v1";
const FILE_EXT: &str = "tsv";

type GroupOffsets = HashMap<(StreamName, u32), u64>;

/// The committed positions of every group, cached in memory and
/// persisted per group.
#[derive(Debug)]
pub(crate) struct OffsetTable {
    dir: PathBuf,
    cache: Mutex<HashMap<GroupName, GroupOffsets>>,
}

impl OffsetTable {
    /// Opens the table, creating the groups directory.
    pub(crate) async fn open(dir: PathBuf) -> StreamResult<Self> {
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| StreamError::backend("offsets open", e))?;
        Ok(Self {
            dir,
            cache: Mutex::new(HashMap::new()),
        })
    }

    /// Returns the group's committed offset on a partition, if any.
    pub(crate) async fn committed(
        &self,
        group: &GroupName,
        partition: &LogPartition,
    ) -> StreamResult<Option<u64>> {
        let mut cache = self.cache.lock().await;
        let offsets = self.load_into(&mut cache, group).await?;
        Ok(offsets
            .get(&(partition.stream.clone(), partition.partition.get()))
            .copied())
    }

    /// Durably records the group's position on a partition.
    pub(crate) async fn commit(
        &self,
        group: &GroupName,
        partition: &LogPartition,
        offset: u64,
    ) -> StreamResult<()> {
        let mut cache = self.cache.lock().await;
        self.load_into(&mut cache, group).await?;
        let offsets = cache.entry(group.clone()).or_default();
        offsets.insert((partition.stream.clone(), partition.partition.get()), offset);
        let serialized = serialize(offsets);
        self.save(group, &serialized).await?;
        trace!(group = %group, partition = %partition, offset, "persisted commit");
        Ok(())
    }

    /// Drops every position the group holds on one stream.
    pub(crate) async fn reset(&self, group: &GroupName, stream: &StreamName) -> StreamResult<()> {
        let mut cache = self.cache.lock().await;
        self.load_into(&mut cache, group).await?;
        let offsets = cache.entry(group.clone()).or_default();
        offsets.retain(|(s, _), _| s != stream);
        let serialized = serialize(offsets);
        self.save(group, &serialized).await
    }

    /// Returns the committed offsets of every group on one partition.
    pub(crate) async fn committed_all(&self, partition: &LogPartition) -> StreamResult<Vec<u64>> {
        let groups = self.all_group_names().await?;
        let key = (partition.stream.clone(), partition.partition.get());
        let mut cache = self.cache.lock().await;
        let mut result = Vec::new();
        for group in groups {
            let offsets = self.load_into(&mut cache, &group).await?;
            if let Some(offset) = offsets.get(&key) {
                result.push(*offset);
            }
        }
        Ok(result)
    }

    /// Lists the groups holding positions on one stream, sorted.
    pub(crate) async fn groups_for(&self, stream: &StreamName) -> StreamResult<Vec<GroupName>> {
        let groups = self.all_group_names().await?;
        let mut cache = self.cache.lock().await;
        let mut result = Vec::new();
        for group in groups {
            let offsets = self.load_into(&mut cache, &group).await?;
            if offsets.keys().any(|(s, _)| s == stream) {
                result.push(group);
            }
        }
        result.sort();
        Ok(result)
    }

    /// Scans the directory for every group file ever written.
    async fn all_group_names(&self) -> StreamResult<Vec<GroupName>> {
        let mut groups = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.dir)
            .await
            .map_err(|e| StreamError::backend("offsets list", e))?;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StreamError::backend("offsets list", e))?
        {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            let Some(stem) = name.strip_suffix(&format!(".{FILE_EXT}")) else {
                continue;
            };
            if let Ok(group) = GroupName::new(stem) {
                groups.push(group);
            }
        }
        Ok(groups)
    }

    /// Ensures the group's file is loaded into the cache, returning its
    /// offsets.
    async fn load_into<'c>(
        &self,
        cache: &'c mut HashMap<GroupName, GroupOffsets>,
        group: &GroupName,
    ) -> StreamResult<&'c GroupOffsets> {
        if !cache.contains_key(group) {
            let path = self.group_path(group);
            let offsets = match tokio::fs::read_to_string(&path).await {
                Ok(contents) => parse(&contents).ok_or_else(|| StreamError::Corruption {
                    message: format!("offset file {} is malformed", path.display()),
                })?,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => GroupOffsets::new(),
                Err(e) => return Err(StreamError::backend("offsets load", e)),
            };
            cache.insert(group.clone(), offsets);
        }
        Ok(cache.entry(group.clone()).or_default())
    }

    async fn save(&self, group: &GroupName, contents: &str) -> StreamResult<()> {
        let path = self.group_path(group);
        let tmp = path.with_extension("tmp");
        tokio::fs::write(&tmp, contents)
            .await
            .map_err(|e| StreamError::backend("offsets save", e))?;
        let file = tokio::fs::File::open(&tmp)
            .await
            .map_err(|e| StreamError::backend("offsets save", e))?;
        file.sync_all()
            .await
            .map_err(|e| StreamError::backend("offsets save", e))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| StreamError::backend("offsets save", e))?;
        Ok(())
    }

    fn group_path(&self, group: &GroupName) -> PathBuf {
        self.dir.join(format!("{}.{FILE_EXT}", group.as_str()))
    }
}

fn serialize(offsets: &GroupOffsets) -> String {
    let mut rows: Vec<_> = offsets.iter().collect();
    rows.sort();
    let mut out = String::from(FORMAT_HEADER);
    out.push('\n');
    for ((stream, partition), offset) in rows {
        out.push_str(&format!("{stream}\t{partition}\t{offset}\n"));
    }
    out
}

fn parse(contents: &str) -> Option<GroupOffsets> {
    let mut lines = contents.lines();
    if lines.next()? != FORMAT_HEADER {
        return None;
    }
    let mut offsets = GroupOffsets::new();
    for line in lines {
        if line.is_empty() {
            continue;
        }
        let mut fields = line.split('\t');
        let stream = StreamName::new(fields.next()?).ok()?;
        let partition: u32 = fields.next()?.parse().ok()?;
        let offset: u64 = fields.next()?.parse().ok()?;
        if fields.next().is_some() {
            return None;
        }
        offsets.insert((stream, partition), offset);
    }
    Some(offsets)
}

#[cfg(test)]
mod tests {
    use super::*;
    use brook_core::LogPartition;

    fn partition(stream: &str, index: u32) -> LogPartition {
        LogPartition::of(StreamName::new(stream).unwrap(), index)
    }

    #[test]
    fn test_serialize_parse_roundtrip() {
        let mut offsets = GroupOffsets::new();
        offsets.insert((StreamName::new("orders").unwrap(), 0), 42);
        offsets.insert((StreamName::new("audit").unwrap(), 3), 7);

        let text = serialize(&offsets);
        assert!(text.starts_with(FORMAT_HEADER));
        assert_eq!(parse(&text).unwrap(), offsets);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(parse("").is_none());
        assert!(parse("not a header\n").is_none());
        assert!(parse("# brook-offsets v1\norders\tnot-a-number\t1\n").is_none());
    }

    #[tokio::test]
    async fn test_commit_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let group = GroupName::new("workers").unwrap();
        let target = partition("orders", 1);

        {
            let table = OffsetTable::open(dir.path().to_path_buf()).await.unwrap();
            table.commit(&group, &target, 10).await.unwrap();
            table.commit(&group, &target, 25).await.unwrap();
        }

        let table = OffsetTable::open(dir.path().to_path_buf()).await.unwrap();
        assert_eq!(table.committed(&group, &target).await.unwrap(), Some(25));
        assert_eq!(table.committed(&group, &partition("orders", 0)).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_reset_drops_only_one_stream() {
        let dir = tempfile::tempdir().unwrap();
        let table = OffsetTable::open(dir.path().to_path_buf()).await.unwrap();
        let group = GroupName::new("g").unwrap();

        table.commit(&group, &partition("a", 0), 5).await.unwrap();
        table.commit(&group, &partition("b", 0), 9).await.unwrap();
        table
            .reset(&group, &StreamName::new("a").unwrap())
            .await
            .unwrap();

        assert_eq!(table.committed(&group, &partition("a", 0)).await.unwrap(), None);
        assert_eq!(table.committed(&group, &partition("b", 0)).await.unwrap(), Some(9));
    }

    #[tokio::test]
    async fn test_groups_for_stream() {
        let dir = tempfile::tempdir().unwrap();
        let table = OffsetTable::open(dir.path().to_path_buf()).await.unwrap();
        let readers = GroupName::new("readers").unwrap();
        let audit = GroupName::new("audit").unwrap();

        table.commit(&readers, &partition("s", 0), 1).await.unwrap();
        table.commit(&audit, &partition("s", 0), 2).await.unwrap();
        table.commit(&audit, &partition("other", 0), 3).await.unwrap();

        let stream = StreamName::new("s").unwrap();
        assert_eq!(table.groups_for(&stream).await.unwrap(), vec![audit.clone(), readers]);
        assert_eq!(
            table.committed_all(&partition("s", 0)).await.unwrap().len(),
            2
        );
    }
}

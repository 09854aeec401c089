use crate::error::BackupError;
use crate::timestamp::Record;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use serde_json::ser::{PrettyFormatter, Serializer};
use std::fs;
use std::io::{self, BufWriter, ErrorKind, Write};
use std::path::Path;
use tempfile::Builder;

/// Persisted state of one conversation. Exactly these two fields are allowed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Snapshot {
    pub channel_info: Value,
    pub messages: Vec<Record>,
}

/// Stored messages for a conversation, or nothing if it was never backed up.
pub fn load(path: &Path) -> Result<Vec<Record>, BackupError> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(source) => {
            return Err(BackupError::Persistence {
                path: path.to_path_buf(),
                source,
            });
        }
    };

    // `channel_info` is rebuilt on every write; only the messages carry over.
    serde_json::from_slice::<Snapshot>(&bytes)
        .map(|snapshot| snapshot.messages)
        .map_err(|source| BackupError::CorruptSnapshot {
            path: path.to_path_buf(),
            source,
        })
}

/// Atomically replace the snapshot at `path`.
pub fn save(path: &Path, snapshot: &Snapshot) -> Result<(), BackupError> {
    write_json(path, snapshot)
}

/// Serialize `value` with sorted keys and 4-space indentation, then swap it
/// into place. Readers of `path` see either the old or the new document.
pub fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), BackupError> {
    write_atomic(path, |writer| {
        let mut ser = Serializer::with_formatter(&mut *writer, PrettyFormatter::with_indent(b"    "));
        value.serialize(&mut ser).map_err(io::Error::from)?;
        writer.write_all(b"\n")
    })
}

/// Write through a temp file in the target directory and rename it over
/// `path`. The temp file is removed on drop if anything fails before the
/// rename.
fn write_atomic<F>(path: &Path, write: F) -> Result<(), BackupError>
where
    F: FnOnce(&mut dyn Write) -> io::Result<()>,
{
    let persistence = |source: io::Error| BackupError::Persistence {
        path: path.to_path_buf(),
        source,
    };

    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir).map_err(persistence)?;

    let mut tmp = Builder::new()
        .prefix(".snapshot-")
        .suffix(".tmp")
        .tempfile_in(dir)
        .map_err(persistence)?;

    {
        let mut writer = BufWriter::new(tmp.as_file_mut());
        write(&mut writer).map_err(persistence)?;
        writer.flush().map_err(persistence)?;
    }
    tmp.as_file().sync_all().map_err(persistence)?;

    tmp.persist(path).map_err(|e| persistence(e.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timestamp::record;
    use serde_json::json;
    use tempfile::tempdir;

    fn sample() -> Snapshot {
        let mut hello = record("1.000100");
        hello.insert("text".into(), json!("hello"));
        hello.insert("user".into(), json!("U1"));
        Snapshot {
            channel_info: json!({"name": "general", "id": "C1"}),
            messages: vec![hello, record("2.000200")],
        }
    }

    fn leftovers(dir: &Path) -> Vec<String> {
        fs::read_dir(dir)
            .unwrap()
            .flatten()
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .filter(|name| name.ends_with(".tmp"))
            .collect()
    }

    #[test]
    fn missing_file_loads_as_empty() {
        let dir = tempdir().unwrap();
        assert!(load(&dir.path().join("nope.json")).unwrap().is_empty());
    }

    #[test]
    fn save_then_load_round_trips_messages() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("channels").join("general.json");
        let snapshot = sample();

        save(&path, &snapshot).unwrap();

        assert_eq!(load(&path).unwrap(), snapshot.messages);
        assert!(leftovers(path.parent().unwrap()).is_empty());
    }

    #[test]
    fn output_is_sorted_and_indented() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("general.json");

        save(&path, &sample()).unwrap();
        let text = fs::read_to_string(&path).unwrap();

        assert!(text.starts_with("{\n    \"channel_info\": {\n        \"id\": \"C1\",\n"));
        assert!(text.find("\"channel_info\"").unwrap() < text.find("\"messages\"").unwrap());
        assert!(text.ends_with("}\n"));
    }

    #[test]
    fn rewriting_unchanged_data_is_byte_identical() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("general.json");

        save(&path, &sample()).unwrap();
        let first = fs::read(&path).unwrap();
        save(&path, &sample()).unwrap();

        assert_eq!(first, fs::read(&path).unwrap());
    }

    #[test]
    fn garbage_is_reported_as_corrupt() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("broken.json");
        fs::write(&path, "{\"channel_info\": {}, \"messages\": [").unwrap();

        assert!(matches!(load(&path), Err(BackupError::CorruptSnapshot { .. })));
    }

    #[test]
    fn document_without_messages_is_corrupt() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("other.json");
        fs::write(&path, "{\"channel_info\": {}}").unwrap();

        assert!(matches!(load(&path), Err(BackupError::CorruptSnapshot { .. })));
    }

    #[test]
    fn document_without_channel_info_is_corrupt() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bare.json");
        fs::write(&path, "{\"messages\": []}").unwrap();

        assert!(matches!(load(&path), Err(BackupError::CorruptSnapshot { .. })));
    }

    #[test]
    fn unexpected_top_level_fields_are_corrupt() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("extra.json");
        fs::write(&path, "{\"channel_info\": {}, \"messages\": [], \"unrelated\": 1}").unwrap();

        assert!(matches!(load(&path), Err(BackupError::CorruptSnapshot { .. })));
    }

    #[test]
    fn failed_write_leaves_previous_snapshot_untouched() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("general.json");
        save(&path, &sample()).unwrap();
        let before = fs::read(&path).unwrap();

        let err = write_atomic(&path, |writer| {
            writer.write_all(b"{\"channel_info\": {}, \"messa")?;
            Err(io::Error::other("disk full"))
        })
        .unwrap_err();

        assert!(matches!(err, BackupError::Persistence { .. }));
        assert_eq!(fs::read(&path).unwrap(), before);
        assert!(leftovers(dir.path()).is_empty());
    }

    #[test]
    fn rename_failure_is_a_persistence_error() {
        let dir = tempdir().unwrap();
        // A non-empty directory cannot be replaced by a file.
        let path = dir.path().join("occupied");
        fs::create_dir(&path).unwrap();
        fs::write(path.join("keep"), "x").unwrap();

        let err = save(&path, &sample()).unwrap_err();

        assert!(matches!(err, BackupError::Persistence { .. }));
        assert!(path.join("keep").exists());
        assert!(leftovers(dir.path()).is_empty());
    }
}

//! On-disk instance records written by the container runtime.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Command-line prefix identifying an instance parent process.
pub const PARENT_MARKER: &str = "Apptainer instance";

/// JSON record describing one running instance.
///
/// Written by the container runtime when an instance starts; read-only
/// input for the registry. The `checkpoint` field is filled in once the
/// instance has been checkpointed at least once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceRecord {
    /// Location of the record file. Not part of the JSON payload.
    #[serde(skip)]
    pub path: PathBuf,
    pub pid: i32,
    pub ppid: i32,
    pub name: String,
    pub user: String,
    pub image: String,
    #[serde(default)]
    pub checkpoint: String,
    #[serde(default)]
    pub ip: String,
    #[serde(default, rename = "logErrPath")]
    pub log_err_path: String,
    #[serde(default, rename = "logOutPath")]
    pub log_out_path: String,
    #[serde(default)]
    pub userns: bool,
    #[serde(default)]
    pub cgroup: bool,
}

impl InstanceRecord {
    /// Load a record from its JSON file.
    pub fn load(path: &Path) -> std::io::Result<Self> {
        let data = std::fs::read(path)?;
        let mut record: InstanceRecord = serde_json::from_slice(&data)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        record.path = path.to_path_buf();
        Ok(record)
    }

    /// Whether the recorded instance is no longer owned by a live instance
    /// parent process.
    ///
    /// A record is a ghost when its `ppid` is gone, or when the PID was
    /// recycled by a process whose `/proc/<ppid>/cmdline` no longer starts
    /// with the instance-parent marker.
    pub fn is_exited(&self) -> bool {
        if self.ppid <= 0 {
            return true;
        }
        match probe(self.ppid) {
            Some(libc::ESRCH) => true,
            // Alive under another uid; permission denied means it exists.
            Some(_) => false,
            None => {
                let cmdline = format!("/proc/{}/cmdline", self.ppid);
                match std::fs::read(&cmdline) {
                    Ok(data) => !data.starts_with(PARENT_MARKER.as_bytes()),
                    // The process may have exited between the probe and the
                    // read; check presence again.
                    Err(_) => probe(self.ppid) == Some(libc::ESRCH),
                }
            }
        }
    }

    /// Delete the record together with its per-instance directory.
    pub fn delete(&self) -> std::io::Result<()> {
        match self.path.parent() {
            Some(dir) => std::fs::remove_dir_all(dir),
            None => std::fs::remove_file(&self.path),
        }
    }
}

/// Null-signal liveness probe. `None` means the process exists and is ours;
/// otherwise the errno from `kill(pid, 0)`.
fn probe(pid: i32) -> Option<i32> {
    if unsafe { libc::kill(pid, 0) } == 0 {
        None
    } else {
        std::io::Error::last_os_error().raw_os_error()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(ppid: i32) -> InstanceRecord {
        InstanceRecord {
            path: PathBuf::new(),
            pid: 1000,
            ppid,
            name: "web1".into(),
            user: "alice".into(),
            image: "/images/web1.sif".into(),
            checkpoint: "ckpt-1".into(),
            ip: String::new(),
            log_err_path: String::new(),
            log_out_path: String::new(),
            userns: false,
            cgroup: false,
        }
    }

    #[test]
    fn no_parent_is_exited() {
        assert!(record(0).is_exited());
        assert!(record(-1).is_exited());
    }

    #[test]
    fn dead_parent_is_exited() {
        // PIDs this large do not exist.
        assert!(record(999_999_999).is_exited());
    }

    #[test]
    fn live_non_instance_parent_is_exited() {
        // Our own process is alive but is not an instance parent.
        assert!(record(std::process::id() as i32).is_exited());
    }

    #[test]
    fn live_instance_parent_is_not_exited() {
        use std::os::unix::process::CommandExt;

        // Spawn a sleeper whose argv[0] carries the instance-parent marker.
        let mut child = std::process::Command::new("sleep")
            .arg0(format!("{PARENT_MARKER} (test)"))
            .arg("30")
            .spawn()
            .expect("spawn sleep");

        let exited = record(child.id() as i32).is_exited();
        let _ = child.kill();
        let _ = child.wait();
        assert!(!exited);
    }

    #[test]
    fn parses_runtime_json() {
        let json = r#"{
            "pid": 12, "ppid": 11, "name": "web1", "user": "alice",
            "image": "/images/web1.sif", "config": "AAEC",
            "userns": false, "cgroup": true, "ip": "10.22.0.4",
            "logErrPath": "/tmp/err", "logOutPath": "/tmp/out",
            "checkpoint": "ckpt-1"
        }"#;
        let record: InstanceRecord = serde_json::from_str(json).unwrap();
        assert_eq!(record.name, "web1");
        assert_eq!(record.checkpoint, "ckpt-1");
        assert_eq!(record.log_err_path, "/tmp/err");
        assert!(record.cgroup);
    }
}

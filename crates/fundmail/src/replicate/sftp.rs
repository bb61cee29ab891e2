//! Upload to an SFTP server
//!
//! One SSH session is opened on first use and reused across calls. A
//! failed call drops the session so the next one reconnects.

use anyhow::{Context, Result, anyhow, bail};
use log::{debug, info};
use ssh2::{Session, Sftp};
use std::fs::File;
use std::io;
use std::net::TcpStream;
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use super::{ReplicationTarget, checked_relative};
use crate::config::SftpSettings;

/// Connect, handshake and per-request timeout
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Permissions of directories created on the server
const DIR_MODE: i32 = 0o755;

pub struct SftpTarget {
    settings: SftpSettings,
    timeout: Duration,
    session: Mutex<Option<Sftp>>,
}

impl SftpTarget {
    pub fn new(settings: SftpSettings) -> Self {
        Self {
            settings,
            timeout: DEFAULT_TIMEOUT,
            session: Mutex::new(None),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn address(&self) -> String {
        format!("{}:{}", self.settings.host, self.settings.port)
    }

    fn connect(&self) -> Result<Sftp> {
        let address = self.address();
        let tcp = TcpStream::connect((self.settings.host.as_str(), self.settings.port))
            .with_context(|| format!("Failed to connect to {}", address))?;
        tcp.set_read_timeout(Some(self.timeout))?;
        tcp.set_write_timeout(Some(self.timeout))?;

        let mut session = Session::new().context("Failed to create SSH session")?;
        session.set_timeout(u32::try_from(self.timeout.as_millis()).unwrap_or(u32::MAX));
        session.set_tcp_stream(tcp);
        session
            .handshake()
            .with_context(|| format!("SSH handshake with {} failed", address))?;
        session
            .userauth_password(&self.settings.user, &self.settings.password)
            .with_context(|| format!("SSH login as {} on {} failed", self.settings.user, address))?;
        if !session.authenticated() {
            bail!("SSH login as {} on {} was not accepted", self.settings.user, address);
        }

        info!("[REPLICATE] Connected to sftp://{}", address);
        session
            .sftp()
            .with_context(|| format!("Failed to open SFTP channel on {}", address))
    }

    /// Run `f` on the cached session, connecting first if needed
    fn with_sftp<T>(&self, f: impl FnOnce(&Sftp) -> Result<T>) -> Result<T> {
        let mut guard = self
            .session
            .lock()
            .map_err(|_| anyhow!("SFTP session lock poisoned"))?;
        let sftp = match guard.take() {
            Some(sftp) => sftp,
            None => self.connect()?,
        };

        let result = f(&sftp);
        if result.is_ok() {
            *guard = Some(sftp);
        }
        result
    }

    fn remote(&self, remote_path: &str) -> Result<String> {
        let relative = checked_relative(remote_path)?;
        let relative = relative
            .to_str()
            .with_context(|| format!("Remote path is not UTF-8: {}", remote_path))?;
        Ok(join_remote(&self.settings.root, relative))
    }
}

impl ReplicationTarget for SftpTarget {
    fn ensure_directory(&self, remote_path: &str) -> Result<()> {
        let full = self.remote(remote_path)?;
        self.with_sftp(|sftp| {
            for dir in directory_chain(&full) {
                match sftp.stat(Path::new(&dir)) {
                    Ok(stat) if stat.is_dir() => {}
                    Ok(_) => bail!("{} exists on the server and is not a directory", dir),
                    Err(_) => {
                        debug!("[REPLICATE] mkdir {}", dir);
                        sftp.mkdir(Path::new(&dir), DIR_MODE)
                            .with_context(|| format!("Failed to create remote directory {}", dir))?;
                    }
                }
            }
            Ok(())
        })
    }

    fn put_file(&self, local_path: &Path, remote_path: &str) -> Result<()> {
        let dest = self.remote(remote_path)?;
        let tmp = format!("{}.part", dest);

        self.with_sftp(|sftp| {
            let mut local = File::open(local_path)
                .with_context(|| format!("Failed to open {}", local_path.display()))?;
            let mut upload = sftp
                .create(Path::new(&tmp))
                .with_context(|| format!("Failed to create remote file {}", tmp))?;
            io::copy(&mut local, &mut upload)
                .with_context(|| format!("Failed to upload {} to {}", local_path.display(), tmp))?;
            drop(upload);

            // SFTPv3 servers refuse to rename over an existing file
            if sftp.stat(Path::new(&dest)).is_ok() {
                sftp.unlink(Path::new(&dest))
                    .with_context(|| format!("Failed to replace remote file {}", dest))?;
            }
            sftp.rename(Path::new(&tmp), Path::new(&dest), None)
                .with_context(|| format!("Failed to move {} into place", dest))?;
            Ok(())
        })
    }
}

/// `root/relative`, with `.` or an empty root meaning the login directory
fn join_remote(root: &str, relative: &str) -> String {
    if root.starts_with('/') {
        return format!("{}/{}", root.trim_end_matches('/'), relative);
    }
    match root.trim_end_matches('/') {
        "" | "." => relative.to_string(),
        root => format!("{}/{}", root, relative),
    }
}

/// Every directory from the top of `path` down to `path` itself
fn directory_chain(path: &str) -> Vec<String> {
    let mut current = if path.starts_with('/') {
        String::from("/")
    } else {
        String::new()
    };

    let mut chain = Vec::new();
    for part in path.split('/').filter(|p| !p.is_empty() && *p != ".") {
        if !current.is_empty() && !current.ends_with('/') {
            current.push('/');
        }
        current.push_str(part);
        chain.push(current.clone());
    }
    chain
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::net::TcpListener;
    use std::thread;

    fn settings(port: u16, root: &str) -> SftpSettings {
        SftpSettings {
            host: "127.0.0.1".to_string(),
            port,
            user: "fund".to_string(),
            password: "pw".to_string(),
            root: root.to_string(),
        }
    }

    #[test]
    fn test_join_remote() {
        assert_eq!(join_remote(".", "2025_06_30/attach"), "2025_06_30/attach");
        assert_eq!(join_remote("", "2025_06_30"), "2025_06_30");
        assert_eq!(join_remote("/upload/fund/", "2025_06_30"), "/upload/fund/2025_06_30");
        assert_eq!(join_remote("/", "2025_06_30"), "/2025_06_30");
        assert_eq!(join_remote("backup/", "2025_06_30"), "backup/2025_06_30");
    }

    #[test]
    fn test_directory_chain() {
        assert_eq!(
            directory_chain("/upload/fund/2025_06_30"),
            vec!["/upload", "/upload/fund", "/upload/fund/2025_06_30"]
        );
        assert_eq!(
            directory_chain("2025_06_30/attach"),
            vec!["2025_06_30", "2025_06_30/attach"]
        );
    }

    #[test]
    fn test_remote_rejects_escape() {
        let target = SftpTarget::new(settings(22, "/upload"));
        assert_eq!(target.remote("2025_06_30/attach").unwrap(), "/upload/2025_06_30/attach");
        assert!(target.remote("../etc").is_err());
        assert!(target.remote("/etc").is_err());
    }

    #[test]
    fn test_non_ssh_server_is_error() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = thread::spawn(move || {
            if let Ok((mut stream, _)) = listener.accept() {
                let _ = stream.write_all(b"HTTP/1.1 400 Bad Request\r\n\r\n");
            }
        });

        let target = SftpTarget::new(settings(port, ".")).with_timeout(Duration::from_secs(5));
        let err = target.ensure_directory("2025_06_30").unwrap_err();
        assert!(format!("{:#}", err).contains(&format!("127.0.0.1:{}", port)));
        server.join().unwrap();
    }
}

// Copyright (c) James Kassemi, SC, US. All rights reserved.

use crate::{TransferError, TransferSink};
use async_trait::async_trait;
use bytes::Bytes;
use core_types::config::FtpSettings;
use log::debug;
use std::io::Cursor;
use suppaftp::types::FileType;
use suppaftp::FtpStream;

pub const DEFAULT_FTP_PORT: u16 = 21;
const ANONYMOUS_LOGIN: &str = "anonymous";

/// Uploads over plain FTP. Every call opens its own control connection and
/// closes it afterwards; nothing is pooled between sends.
#[derive(Debug, Clone)]
pub struct FtpTransferSink {
    address: String,
    login: String,
    password: String,
    remote_dir: String,
}

impl FtpTransferSink {
    pub fn new(settings: &FtpSettings) -> Self {
        Self {
            address: with_default_port(&settings.server),
            login: settings.login.clone(),
            password: settings.password.clone(),
            remote_dir: normalize_remote_dir(&settings.path),
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn remote_path(&self, name: &str) -> String {
        format!("{}{name}", self.remote_dir)
    }

    fn credentials(&self) -> (&str, &str) {
        if self.login.is_empty() {
            (ANONYMOUS_LOGIN, ANONYMOUS_LOGIN)
        } else {
            (&self.login, &self.password)
        }
    }

    fn upload(&self, remote_path: &str, content: &[u8]) -> Result<(), TransferError> {
        let mut stream = FtpStream::connect(&self.address)?;
        let result = self.store_on(&mut stream, remote_path, content);
        // Close the session even when the upload failed.
        let quit = stream.quit();
        result?;
        quit?;
        Ok(())
    }

    fn store_on(
        &self,
        stream: &mut FtpStream,
        remote_path: &str,
        content: &[u8],
    ) -> Result<(), TransferError> {
        let (user, password) = self.credentials();
        stream.login(user, password)?;
        stream.transfer_type(FileType::Binary)?;
        let written = stream.put_file(remote_path, &mut Cursor::new(content))?;
        debug!("stored {written} bytes at {remote_path}");
        Ok(())
    }
}

#[async_trait]
impl TransferSink for FtpTransferSink {
    async fn send(&self, name: &str, content: Bytes) -> Result<(), TransferError> {
        let sink = self.clone();
        let remote_path = self.remote_path(name);
        tokio::task::spawn_blocking(move || sink.upload(&remote_path, &content)).await?
    }
}

/// Remote directories always start and end with `/`.
pub fn normalize_remote_dir(path: &str) -> String {
    let trimmed = path.trim_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else {
        format!("/{trimmed}/")
    }
}

/// Appends `:21` to a host given without a port.
pub fn with_default_port(server: &str) -> String {
    let has_port = match server.rsplit_once(':') {
        Some((host, port)) => {
            !port.is_empty() && port.bytes().all(|b| b.is_ascii_digit()) && !host.ends_with(':')
        }
        None => false,
    };
    if has_port {
        server.to_string()
    } else {
        format!("{server}:{DEFAULT_FTP_PORT}")
    }
}

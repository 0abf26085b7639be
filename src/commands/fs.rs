use crate::cli::{validate_client, validate_virtual_path};
use redirectfs::overlay::{ClientId, FsReply, FsRequest, OpenMode};
use redirectfs::session::{AsyncCompletion, CompletionRecord};
use redirectfs::{FsError, RedirectError, Result, Session};
use std::io::Write;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};

const READ_CHUNK: usize = 64 * 1024;

/// Issues requests through the asynchronous path and awaits their
/// completion records one at a time.
struct AsyncClient<'a> {
    session: &'a Session,
    client: ClientId,
    tx: UnboundedSender<CompletionRecord>,
    rx: UnboundedReceiver<CompletionRecord>,
    next_tag: u64,
}

impl<'a> AsyncClient<'a> {
    fn new(session: &'a Session, client: ClientId) -> Self {
        let (tx, rx) = unbounded_channel();
        AsyncClient {
            session,
            client,
            tx,
            rx,
            next_tag: 1,
        }
    }

    async fn request(&mut self, request: FsRequest) -> std::result::Result<FsReply, FsError> {
        let tag = self.next_tag;
        self.next_tag += 1;
        self.session.submit(
            self.client,
            request,
            AsyncCompletion::queue(self.tx.clone(), tag),
        )?;

        while let Some(record) = self.rx.recv().await {
            if record.tag == tag {
                return record.result;
            }
            tracing::warn!("Dropping stale completion {}", record.tag);
        }
        Err(FsError::Cancelled)
    }
}

fn fs_error(path: &str, err: FsError) -> RedirectError {
    RedirectError::Session(format!("{}: {}", path, err))
}

pub async fn list_dir(session: &Session, client: ClientId, path: &str, json: bool) -> Result<()> {
    validate_client(client)?;
    validate_virtual_path(path)?;
    let mut io = AsyncClient::new(session, client);

    let handle = io
        .request(FsRequest::OpenDir {
            path: path.to_string(),
        })
        .await
        .and_then(FsReply::into_handle)
        .map_err(|e| fs_error(path, e))?;

    let mut entries = Vec::new();
    let drained = loop {
        match io
            .request(FsRequest::ReadDir { handle })
            .await
            .and_then(FsReply::into_entry)
        {
            Ok(Some(entry)) => entries.push(entry),
            Ok(None) => break Ok(()),
            Err(e) => break Err(e),
        }
    };
    let closed = io
        .request(FsRequest::CloseDir { handle })
        .await
        .and_then(FsReply::into_done);
    drained.map_err(|e| fs_error(path, e))?;
    closed.map_err(|e| fs_error(path, e))?;

    entries.sort_by(|a, b| a.name.cmp(&b.name));

    if json {
        println!("{}", serde_json::to_string(&entries)?);
    } else {
        for entry in &entries {
            if entry.stat.is_dir {
                println!("{}/", entry.name);
            } else {
                println!("{}\t{}", entry.name, entry.stat.size);
            }
        }
    }
    Ok(())
}

pub async fn cat_file(session: &Session, client: ClientId, path: &str) -> Result<()> {
    validate_client(client)?;
    validate_virtual_path(path)?;
    let mut io = AsyncClient::new(session, client);

    let handle = io
        .request(FsRequest::OpenFile {
            path: path.to_string(),
            mode: OpenMode::Read,
        })
        .await
        .and_then(FsReply::into_handle)
        .map_err(|e| fs_error(path, e))?;

    let mut stdout = std::io::stdout().lock();
    let copied = loop {
        let chunk = match io
            .request(FsRequest::ReadFile {
                handle,
                len: READ_CHUNK,
                pos: None,
            })
            .await
            .and_then(FsReply::into_data)
        {
            Ok(chunk) => chunk,
            Err(e) => break Err(fs_error(path, e)),
        };
        if chunk.is_empty() {
            break Ok(());
        }
        if let Err(e) = stdout.write_all(&chunk) {
            break Err(RedirectError::Io(e));
        }
    };
    stdout.flush()?;

    let closed = io
        .request(FsRequest::CloseFile { handle })
        .await
        .and_then(FsReply::into_done);
    copied?;
    closed.map_err(|e| fs_error(path, e))?;
    Ok(())
}

pub async fn stat_path(session: &Session, client: ClientId, path: &str, json: bool) -> Result<()> {
    validate_client(client)?;
    validate_virtual_path(path)?;
    let mut io = AsyncClient::new(session, client);

    let stat = io
        .request(FsRequest::GetStat {
            path: path.to_string(),
        })
        .await
        .and_then(FsReply::into_stat)
        .map_err(|e| fs_error(path, e))?;

    if json {
        println!("{}", serde_json::to_string(&stat)?);
    } else {
        let modified = chrono::DateTime::from_timestamp(stat.modified, 0)
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| stat.modified.to_string());
        println!("  Path: {}", path);
        println!("  Type: {}", if stat.is_dir { "directory" } else { "file" });
        println!("  Size: {}", stat.size);
        println!("  Mode: {:o}", stat.mode);
        println!("  Modified: {}", modified);
    }
    Ok(())
}

//! Streaming a remote resource to a local file.

use crate::error::{ClientError, ClientResult};
use futures_util::StreamExt;
use std::path::{Path, PathBuf};
use tessera_core::CONTAINER_SUFFIX;
use tokio::fs;
use tokio::io::AsyncWriteExt;

/// Local file name for `url`: containers keep their suffix.
pub fn local_name(url: &str, localpath: &Path) -> PathBuf {
    let remote_is_container = url
        .split(['?', '#'])
        .next()
        .is_some_and(|p| p.ends_with(CONTAINER_SUFFIX));
    let already_suffixed = localpath.to_string_lossy().ends_with(CONTAINER_SUFFIX);
    if remote_is_container && !already_suffixed {
        let mut name = localpath.as_os_str().to_owned();
        name.push(CONTAINER_SUFFIX);
        PathBuf::from(name)
    } else {
        localpath.to_path_buf()
    }
}

/// Stream `url` to disk and return the path written.
///
/// Parent directories are created as needed. When the remote path is a
/// container the local name gets the container suffix too.
pub async fn download_url(
    http: &reqwest::Client,
    url: &str,
    localpath: &Path,
) -> ClientResult<PathBuf> {
    let target = local_name(url, localpath);
    let response = http.get(url).send().await?;
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(ClientError::Status {
            status: status.as_u16(),
            body,
        });
    }

    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent).await?;
    }
    let mut file = fs::File::create(&target).await?;
    let mut stream = response.bytes_stream();
    let mut written = 0u64;
    while let Some(piece) = stream.next().await {
        let piece = piece?;
        file.write_all(&piece).await?;
        written += piece.len() as u64;
    }
    file.flush().await?;

    tracing::debug!(url, path = %target.display(), bytes = written, "Downloaded");
    Ok(target)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_name_adds_container_suffix() {
        assert_eq!(
            local_name("http://h/api/download/foo/arr.tsr", Path::new("out/arr")),
            PathBuf::from("out/arr.tsr")
        );
        assert_eq!(
            local_name("http://h/api/download/foo/arr.tsr?slice=1", Path::new("out/arr.tsr")),
            PathBuf::from("out/arr.tsr")
        );
        assert_eq!(
            local_name("http://h/api/download/foo/a.txt", Path::new("out/a.txt")),
            PathBuf::from("out/a.txt")
        );
    }
}

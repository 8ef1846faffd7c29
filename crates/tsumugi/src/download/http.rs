use std::future::Future;

use bytes::Bytes;
use reqwest::{
    header::{HeaderMap, RANGE},
    Client, StatusCode,
};
use tokio_util::sync::CancellationToken;

use super::Downloader;
use crate::{CancelReason, DownloadRequest, TsumugiError, TsumugiResult};

/// Fetches segments over HTTP.
#[derive(Debug, Clone, Default)]
pub struct HttpDownloader {
    client: Client,
    headers: HeaderMap,
}

impl HttpDownloader {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            headers: HeaderMap::new(),
        }
    }

    /// Headers sent with every segment request.
    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }
}

impl Downloader for HttpDownloader {
    fn fetch(
        &self,
        request: &DownloadRequest,
        cancel: CancellationToken,
    ) -> impl Future<Output = TsumugiResult<Bytes>> + Send {
        let mut builder = self
            .client
            .get(request.segment.url.clone())
            .headers(self.headers.clone());
        let byte_range = request.segment.byte_range;
        if let Some(range) = byte_range.and_then(|byte_range| byte_range.to_http_range()) {
            builder = builder.header(RANGE, range);
        }
        let empty = byte_range.is_some_and(|byte_range| byte_range.is_empty());

        let url = request.segment.url.clone();
        let stream_type = request.stream_type;
        let ignore_error = request.ignore_error;

        async move {
            if empty {
                return Ok(Bytes::new());
            }
            let download = async {
                let response = builder.send().await?;
                let status = response.status();
                if !status.is_success() {
                    if ignore_error && status == StatusCode::NOT_FOUND {
                        tracing::debug!(stream = %stream_type, "{url} is not available yet");
                    } else if let Ok(body) = response.text().await {
                        tracing::warn!(stream = %stream_type, "Error body of {url}: {body}");
                    }
                    return Err(TsumugiError::HttpError(status));
                }

                Ok(response.bytes().await?)
            };

            cancel
                .run_until_cancelled(download)
                .await
                .unwrap_or(Err(TsumugiError::Cancelled(CancelReason::Stopped)))
        }
    }
}

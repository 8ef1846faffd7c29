mod http;

pub use http::HttpDownloader;

use std::{future::Future, sync::Arc};

use bytes::Bytes;
use tokio_util::sync::CancellationToken;

use crate::{DownloadRequest, TsumugiResult};

/// Transport used by the scheduler to fetch segments.
pub trait Downloader: Send + Sync + 'static {
    /// Fetch the whole payload of `request.segment`.
    ///
    /// A missing resource must be reported so that
    /// [`TsumugiError::is_not_found`](crate::TsumugiError::is_not_found) holds.
    /// The download should be abandoned once `cancel` fires.
    fn fetch(
        &self,
        request: &DownloadRequest,
        cancel: CancellationToken,
    ) -> impl Future<Output = TsumugiResult<Bytes>> + Send;
}

impl<D> Downloader for Arc<D>
where
    D: Downloader,
{
    fn fetch(
        &self,
        request: &DownloadRequest,
        cancel: CancellationToken,
    ) -> impl Future<Output = TsumugiResult<Bytes>> + Send {
        self.as_ref().fetch(request, cancel)
    }
}

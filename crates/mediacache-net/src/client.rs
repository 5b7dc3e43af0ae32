#![forbid(unsafe_code)]

use futures::TryStreamExt;
use reqwest::{Client, header};
use tracing::debug;
use url::Url;

use crate::{
    ByteStream,
    error::{NetError, NetResult},
    types::{Headers, NetOptions, RangeSpec, ResponseInfo},
};

/// A ranged GET: response metadata plus the streaming body.
pub struct RangeResponse {
    pub info: ResponseInfo,
    pub stream: ByteStream,
}

impl std::fmt::Debug for RangeResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RangeResponse")
            .field("info", &self.info)
            .field("stream", &"<ByteStream>")
            .finish()
    }
}

#[derive(Clone, Debug)]
pub struct HttpClient {
    inner: Client,
}

impl HttpClient {
    /// # Panics
    ///
    /// Panics if the `reqwest::Client` builder fails to build.
    #[must_use]
    pub fn new(options: &NetOptions) -> Self {
        let inner = Client::builder()
            .pool_max_idle_per_host(options.pool_max_idle_per_host)
            .connect_timeout(options.request_timeout)
            .build()
            .expect("failed to build reqwest client");
        Self { inner }
    }

    /// Issue one ranged GET for `range`.
    ///
    /// Accepts `206 Partial Content` as well as `200 OK` (servers without
    /// range support reply with the full body).
    ///
    /// # Errors
    ///
    /// Returns [`NetError`] on connection failure or a non-success status.
    pub async fn get_range(
        &self,
        url: Url,
        range: RangeSpec,
        headers: Option<Headers>,
    ) -> NetResult<RangeResponse> {
        let mut req = self
            .inner
            .get(url.clone())
            .header(header::RANGE, range.to_header_value());
        if let Some(headers) = headers {
            for (k, v) in headers.iter() {
                req = req.header(k, v);
            }
        }

        let resp = req.send().await.map_err(NetError::from)?;
        let status = resp.status();
        if !status.is_success() {
            return Err(NetError::http_status(status.as_u16(), url.to_string()));
        }

        let info = response_info(&resp);
        debug!(
            %url,
            status = info.status,
            range = %range.to_header_value(),
            mime = info.mime_type.as_deref().unwrap_or(""),
            "range request started"
        );

        let stream = resp.bytes_stream().map_err(NetError::from);
        Ok(RangeResponse {
            info,
            stream: Box::pin(stream),
        })
    }
}

fn response_info(resp: &reqwest::Response) -> ResponseInfo {
    let header_str = |name: header::HeaderName| {
        resp.headers()
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };

    ResponseInfo {
        status: resp.status().as_u16(),
        mime_type: header_str(header::CONTENT_TYPE),
        content_range: header_str(header::CONTENT_RANGE),
        content_length: header_str(header::CONTENT_LENGTH).and_then(|v| v.parse().ok()),
        accept_ranges: header_str(header::ACCEPT_RANGES)
            .is_some_and(|v| v.eq_ignore_ascii_case("bytes")),
    }
}

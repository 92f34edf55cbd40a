//! 回调传输抽象
//! Callback transport abstraction

use crate::error::{Error, Result};
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::CONTENT_TYPE;

/// Header carrying the firing's sequence number.
/// 携带触发序列号的请求头。
pub const SEQUENCE_HEADER: &str = "X-Sequence-Number";

/// 执行单次回调尝试的传输层
/// Transport that performs one callback attempt
///
/// Any error, including a non-2xx answer, is treated as a failed attempt.
#[async_trait]
pub trait CallbackTransport: Send + Sync + 'static {
    async fn post(&self, uri: &str, sequence_number: u64, body: Bytes) -> Result<()>;
}

/// 基于 reqwest 连接池的HTTP回调传输
/// HTTP callback transport on a pooled reqwest client
#[derive(Debug, Clone, Default)]
pub struct HttpCallbackTransport {
    client: reqwest::Client,
}

impl HttpCallbackTransport {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl CallbackTransport for HttpCallbackTransport {
    async fn post(&self, uri: &str, sequence_number: u64, body: Bytes) -> Result<()> {
        let response = self
            .client
            .post(uri)
            .header(SEQUENCE_HEADER, sequence_number)
            .header(CONTENT_TYPE, "application/octet-stream")
            .body(body)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(Error::Rejected {
                target: uri.to_owned(),
                status: status.as_u16(),
            })
        }
    }
}

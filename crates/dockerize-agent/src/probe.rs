//! HTTP readiness probe over reqwest.

use std::time::Duration;

use async_trait::async_trait;
use healing::{HttpProbe, ProbeError};

/// GETs `http://{host}:{port}/` and reports the status code.
///
/// Redirects are not followed: a 3xx already proves the app is listening.
#[derive(Debug, Clone)]
pub struct ReqwestProbe {
    client: reqwest::Client,
    host: String,
}

impl ReqwestProbe {
    pub fn new(host: impl Into<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()?;
        Ok(Self {
            client,
            host: host.into(),
        })
    }

    fn url(&self, port: u16) -> String {
        format!("http://{}:{port}/", self.host)
    }
}

#[async_trait]
impl HttpProbe for ReqwestProbe {
    async fn get(&self, port: u16) -> Result<u16, ProbeError> {
        let url = self.url(port);
        match self.client.get(&url).send().await {
            Ok(response) => Ok(response.status().as_u16()),
            Err(e) if e.is_timeout() => Err(ProbeError::Timeout(format!("{url}: {e}"))),
            Err(e) => Err(ProbeError::Connection(format!("{url}: {e}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[test]
    fn test_url_shape() {
        let probe = ReqwestProbe::new("127.0.0.1", Duration::from_secs(1)).unwrap();
        assert_eq!(probe.url(8080), "http://127.0.0.1:8080/");
    }

    #[tokio::test]
    async fn test_closed_port_is_a_connection_error() {
        // Bind then drop to get a port nobody listens on.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let probe = ReqwestProbe::new("127.0.0.1", Duration::from_secs(2)).unwrap();
        let err = probe.get(port).await.unwrap_err();
        assert!(matches!(err, ProbeError::Connection(_)), "{err}");
    }

    #[tokio::test]
    async fn test_reports_server_status() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            if let Ok((mut socket, _)) = listener.accept().await {
                let mut buf = [0u8; 1024];
                let _ = socket.read(&mut buf).await;
                let _ = socket
                    .write_all(
                        b"HTTP/1.1 503 Service Unavailable\r\ncontent-length: 0\r\nconnection: close\r\n\r\n",
                    )
                    .await;
            }
        });

        let probe = ReqwestProbe::new("127.0.0.1", Duration::from_secs(5)).unwrap();
        assert_eq!(probe.get(port).await.unwrap(), 503);
    }
}

use std::io::Read;
use std::time::Duration;

use reqwest::StatusCode;
use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};

use crate::error::FluxError;

/// HTTP access for artifact resolution and download.
pub trait ArtifactTransport: Send + Sync {
    /// Status code the server answers for `url`, without reading a body.
    fn probe(&self, url: &str) -> Result<u16, FluxError>;
    /// Body reader for a successful GET of `url`.
    fn open(&self, url: &str) -> Result<Box<dyn Read + Send>, FluxError>;
}

#[derive(Clone)]
pub struct ArtifactHttpClient {
    client: Client,
}

impl ArtifactHttpClient {
    pub fn new(timeout: Duration) -> Result<Self, FluxError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("flux-stations/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| FluxError::Http(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .connect_timeout(Duration::from_secs(30))
            .timeout(timeout)
            .build()
            .map_err(|err| FluxError::Http(err.to_string()))?;
        Ok(Self { client })
    }
}

/// Some file servers refuse HEAD outright, so their answer says nothing
/// about the artifact.
fn needs_get_fallback(status: StatusCode) -> bool {
    status == StatusCode::METHOD_NOT_ALLOWED || status == StatusCode::NOT_IMPLEMENTED
}

fn check_status(status: StatusCode, url: &str) -> Result<(), FluxError> {
    if status.is_success() {
        Ok(())
    } else {
        Err(FluxError::HttpStatus {
            status: status.as_u16(),
            url: url.to_string(),
        })
    }
}

impl ArtifactTransport for ArtifactHttpClient {
    fn probe(&self, url: &str) -> Result<u16, FluxError> {
        let response = self
            .client
            .head(url)
            .send()
            .map_err(|err| FluxError::Http(err.to_string()))?;
        let status = response.status();
        if needs_get_fallback(status) {
            let response = self
                .client
                .get(url)
                .send()
                .map_err(|err| FluxError::Http(err.to_string()))?;
            return Ok(response.status().as_u16());
        }
        Ok(status.as_u16())
    }

    fn open(&self, url: &str) -> Result<Box<dyn Read + Send>, FluxError> {
        let response = self
            .client
            .get(url)
            .send()
            .map_err(|err| FluxError::Http(err.to_string()))?;
        check_status(response.status(), url)?;
        Ok(Box::new(response))
    }
}

#[cfg(test)]
mod tests {
    use std::io::{BufRead, BufReader, Write};
    use std::net::TcpListener;
    use std::sync::{Arc, Mutex};
    use std::thread;

    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn only_refused_head_falls_back_to_get() {
        assert!(needs_get_fallback(StatusCode::METHOD_NOT_ALLOWED));
        assert!(needs_get_fallback(StatusCode::NOT_IMPLEMENTED));
        assert!(!needs_get_fallback(StatusCode::OK));
        assert!(!needs_get_fallback(StatusCode::NOT_FOUND));
        assert!(!needs_get_fallback(StatusCode::FORBIDDEN));
    }

    #[test]
    fn non_success_status_is_an_error() {
        assert!(check_status(StatusCode::OK, "https://example.org/a.nc").is_ok());
        assert!(check_status(StatusCode::PARTIAL_CONTENT, "https://example.org/a.nc").is_ok());
        let err = check_status(StatusCode::NOT_FOUND, "https://example.org/a.nc").unwrap_err();
        assert_matches!(
            err,
            FluxError::HttpStatus { status: 404, ref url } if url == "https://example.org/a.nc"
        );
    }

    /// Serves `connections` requests on loopback: HEAD gets 405, GET of
    /// `/site.nc` gets a body, anything else 404. Returns the base URL and
    /// the list of request lines seen.
    fn serve(connections: usize) -> (String, Arc<Mutex<Vec<String>>>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let log = seen.clone();
        thread::spawn(move || {
            for stream in listener.incoming().take(connections) {
                let mut stream = stream.unwrap();
                let mut reader = BufReader::new(stream.try_clone().unwrap());
                let mut request_line = String::new();
                reader.read_line(&mut request_line).unwrap();
                loop {
                    let mut line = String::new();
                    if reader.read_line(&mut line).unwrap() == 0 || line == "\r\n" {
                        break;
                    }
                }
                let request_line = request_line.trim_end().to_string();
                let response = if request_line.starts_with("HEAD ") {
                    "HTTP/1.1 405 Method Not Allowed\r\nContent-Length: 0\r\nConnection: close\r\n\r\n"
                } else if request_line.starts_with("GET /site.nc ") {
                    "HTTP/1.1 200 OK\r\nContent-Length: 3\r\nConnection: close\r\n\r\nCDF"
                } else {
                    "HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n"
                };
                log.lock().unwrap().push(request_line);
                stream.write_all(response.as_bytes()).unwrap();
            }
        });
        (base, seen)
    }

    #[test]
    fn refused_head_is_retried_with_get() {
        let (base, seen) = serve(2);
        let client = ArtifactHttpClient::new(Duration::from_secs(10)).unwrap();
        let status = client.probe(&format!("{base}/site.nc")).unwrap();
        assert_eq!(status, 200);
        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                "HEAD /site.nc HTTP/1.1".to_string(),
                "GET /site.nc HTTP/1.1".to_string(),
            ]
        );
    }

    #[test]
    fn open_streams_body_or_reports_status() {
        let (base, _) = serve(2);
        let client = ArtifactHttpClient::new(Duration::from_secs(10)).unwrap();

        let mut body = Vec::new();
        client
            .open(&format!("{base}/site.nc"))
            .unwrap()
            .read_to_end(&mut body)
            .unwrap();
        assert_eq!(body, b"CDF");

        let err = client.open(&format!("{base}/missing.nc")).err().unwrap();
        assert_matches!(err, FluxError::HttpStatus { status: 404, .. });
    }
}

//! The [`Transport`] seam between the agent and the network, and a [`ReqwestTransport`]
//! implementing it over HTTP.

use crate::agent::AgentError;
use http::Method;
use std::{future::Future, pin::Pin};

/// A boxed future returned by [`Transport`] methods.
pub type AgentFuture<'a, V> = Pin<Box<dyn Future<Output = Result<V, AgentError>> + Send + 'a>>;

/// A raw response from the replica. The agent interprets the status; transports report it
/// unchanged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    /// The HTTP status code.
    pub status: u16,
    /// The value of the `Content-Type` header, if any.
    pub content_type: Option<String>,
    /// The response body.
    pub body: Vec<u8>,
}

/// A facade that connects to a replica and executes requests. This trait inverts the
/// control from the [`Agent`](crate::Agent) over its connection code, so that the agent
/// can run over any HTTP client, or none at all in tests.
///
/// Any error returned by this method is treated as a delivery failure and retried.
pub trait Transport: Send + Sync {
    /// Sends a request to `path`, relative to the replica's `/api/` root (for example
    /// `v2/status`), with an optional CBOR body.
    fn execute<'a>(
        &'a self,
        method: Method,
        path: String,
        body: Option<Vec<u8>>,
    ) -> AgentFuture<'a, HttpResponse>;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn execute<'a>(
        &'a self,
        method: Method,
        path: String,
        body: Option<Vec<u8>>,
    ) -> AgentFuture<'a, HttpResponse> {
        (**self).execute(method, path, body)
    }
}

impl<T: Transport + ?Sized> Transport for std::sync::Arc<T> {
    fn execute<'a>(
        &'a self,
        method: Method,
        path: String,
        body: Option<Vec<u8>>,
    ) -> AgentFuture<'a, HttpResponse> {
        (**self).execute(method, path, body)
    }
}

#[cfg(feature = "reqwest")]
pub use reqwest_transport::{reqwest, ReqwestTransport};

#[cfg(feature = "reqwest")]
mod reqwest_transport {
    use super::{AgentFuture, HttpResponse, Transport};
    use crate::agent::AgentError;
    use futures_util::StreamExt;
    use http::Method;
    pub use reqwest;
    use reqwest::{header::CONTENT_TYPE, Body, Client, Request, Url};
    use std::time::Duration;

    /// A [`Transport`] using [`reqwest`] to make HTTP calls to a replica.
    #[derive(Debug, Clone)]
    pub struct ReqwestTransport {
        url: Url,
        client: Client,
        max_response_body_size: Option<usize>,
    }

    impl ReqwestTransport {
        /// Creates a replica transport from a HTTP URL. By default a request timeout of 6 minutes is used.
        /// Use `create_with_client` to configure this and other client options.
        pub fn create<U: Into<String>>(url: U) -> Result<Self, AgentError> {
            let client = Client::builder()
                .use_rustls_tls()
                .timeout(Duration::from_secs(360))
                .build()
                .map_err(|e| AgentError::TransportError(Box::new(e)))?;
            Self::create_with_client(url, client)
        }

        /// Creates a replica transport from a HTTP URL and a [`reqwest::Client`].
        pub fn create_with_client<U: Into<String>>(
            url: U,
            client: Client,
        ) -> Result<Self, AgentError> {
            let url = url.into();
            let url = Url::parse(&url)
                .and_then(|url| url.join("api/"))
                .map_err(|_| AgentError::InvalidReplicaUrl(url.clone()))?;
            Ok(Self {
                url,
                client,
                max_response_body_size: None,
            })
        }

        /// Sets a max response body size limit
        pub fn with_max_response_body_size(self, max_response_body_size: usize) -> Self {
            ReqwestTransport {
                max_response_body_size: Some(max_response_body_size),
                ..self
            }
        }

        async fn request(
            &self,
            method: Method,
            path: &str,
            body: Option<Vec<u8>>,
        ) -> Result<HttpResponse, AgentError> {
            let url = self.url.join(path)?;
            let mut http_request = Request::new(method, url);
            http_request.headers_mut().insert(
                CONTENT_TYPE,
                reqwest::header::HeaderValue::from_static("application/cbor"),
            );
            *http_request.body_mut() = body.map(Body::from);

            let response = self
                .client
                .execute(http_request)
                .await
                .map_err(|e| AgentError::TransportError(Box::new(e)))?;

            let status = response.status().as_u16();
            let content_type = response
                .headers()
                .get(CONTENT_TYPE)
                .and_then(|value| value.to_str().ok())
                .map(str::to_string);

            // Size Check (Content-Length)
            if matches!(self
                .max_response_body_size
                .zip(response.content_length()), Some((size_limit, content_length)) if content_length as usize > size_limit)
            {
                return Err(AgentError::ResponseSizeExceededLimit);
            }

            let mut body: Vec<u8> = response
                .content_length()
                .map_or_else(Vec::new, |n| Vec::with_capacity(n as usize));
            let mut stream = response.bytes_stream();
            while let Some(chunk) = stream.next().await {
                let chunk = chunk.map_err(|e| AgentError::TransportError(Box::new(e)))?;

                // Size Check (Body Size)
                if matches!(self
                    .max_response_body_size, Some(size_limit) if body.len() + chunk.len() > size_limit)
                {
                    return Err(AgentError::ResponseSizeExceededLimit);
                }
                body.extend_from_slice(chunk.as_ref());
            }

            Ok(HttpResponse {
                status,
                content_type,
                body,
            })
        }
    }

    impl Transport for ReqwestTransport {
        fn execute<'a>(
            &'a self,
            method: Method,
            path: String,
            body: Option<Vec<u8>>,
        ) -> AgentFuture<'a, HttpResponse> {
            Box::pin(async move { self.request(method, &path, body).await })
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn joins_the_api_root() {
            let transport = ReqwestTransport::create("https://ic0.app").unwrap();
            assert_eq!(transport.url.as_str(), "https://ic0.app/api/");
            assert_eq!(
                transport.url.join("v2/status").unwrap().as_str(),
                "https://ic0.app/api/v2/status"
            );

            let transport = ReqwestTransport::create("http://localhost:4943/").unwrap();
            assert_eq!(transport.url.as_str(), "http://localhost:4943/api/");
        }

        #[test]
        fn rejects_invalid_urls() {
            assert!(matches!(
                ReqwestTransport::create("not a url"),
                Err(AgentError::InvalidReplicaUrl(url)) if url == "not a url"
            ));
        }
    }
}

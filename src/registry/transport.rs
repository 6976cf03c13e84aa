use std::io::Read;
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{ACCEPT, AUTHORIZATION};
use tracing::debug;

use crate::error::TransportError;

/// The HTTP calls a pull needs. Implemented over the network by [`HttpTransport`].
pub trait Transport {
    /// POSTs a url-encoded form and returns the response body.
    fn post_form(&self, url: &str, form: &[(&str, &str)]) -> Result<Vec<u8>, TransportError>;

    /// GETs `url` with a bearer token, returning the body as a stream.
    fn get(
        &self,
        url: &str,
        token: &str,
        accept: Option<&str>,
    ) -> Result<Box<dyn Read + '_>, TransportError>;
}

pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new(timeout: Option<Duration>) -> Result<Self, TransportError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(TransportError::Client)?;
        Ok(Self { client })
    }
}

fn check_status(
    url: &str,
    response: reqwest::blocking::Response,
) -> Result<reqwest::blocking::Response, TransportError> {
    let status = response.status();
    if !status.is_success() {
        return Err(TransportError::Status {
            url: url.to_string(),
            status: status.as_u16(),
        });
    }
    Ok(response)
}

impl Transport for HttpTransport {
    fn post_form(&self, url: &str, form: &[(&str, &str)]) -> Result<Vec<u8>, TransportError> {
        debug!(url, "POST");
        let request_error = |source| TransportError::Request {
            url: url.to_string(),
            source,
        };

        let response = self
            .client
            .post(url)
            .form(form)
            .send()
            .map_err(request_error)?;
        let body = check_status(url, response)?
            .bytes()
            .map_err(request_error)?;
        Ok(body.to_vec())
    }

    fn get(
        &self,
        url: &str,
        token: &str,
        accept: Option<&str>,
    ) -> Result<Box<dyn Read + '_>, TransportError> {
        debug!(url, ?accept, "GET");
        let mut request = self
            .client
            .get(url)
            .header(AUTHORIZATION, format!("Bearer {}", token));
        if let Some(accept) = accept {
            request = request.header(ACCEPT, accept);
        }

        let response = request.send().map_err(|source| TransportError::Request {
            url: url.to_string(),
            source,
        })?;
        Ok(Box::new(check_status(url, response)?))
    }
}

#[cfg(test)]
pub(crate) mod fake {
    use std::cell::RefCell;
    use std::collections::HashMap;
    use std::io::{Cursor, Read};

    use super::Transport;
    use crate::error::TransportError;

    /// A recorded GET: url, token, accept header.
    pub type Request = (String, String, Option<String>);

    /// In-memory registry keyed by full URL.
    #[derive(Default)]
    pub struct FakeTransport {
        pub responses: HashMap<String, Vec<u8>>,
        pub token_response: Option<Vec<u8>>,
        pub forms: RefCell<Vec<Vec<(String, String)>>>,
        pub requests: RefCell<Vec<Request>>,
    }

    impl FakeTransport {
        pub fn respond(&mut self, url: impl Into<String>, body: impl Into<Vec<u8>>) -> &mut Self {
            self.responses.insert(url.into(), body.into());
            self
        }

        pub fn requested_urls(&self) -> Vec<String> {
            self.requests.borrow().iter().map(|r| r.0.clone()).collect()
        }
    }

    impl Transport for FakeTransport {
        fn post_form(&self, url: &str, form: &[(&str, &str)]) -> Result<Vec<u8>, TransportError> {
            self.forms.borrow_mut().push(
                form.iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
            );
            self.token_response.clone().ok_or(TransportError::Status {
                url: url.to_string(),
                status: 401,
            })
        }

        fn get(
            &self,
            url: &str,
            token: &str,
            accept: Option<&str>,
        ) -> Result<Box<dyn Read + '_>, TransportError> {
            self.requests.borrow_mut().push((
                url.to_string(),
                token.to_string(),
                accept.map(str::to_string),
            ));
            match self.responses.get(url) {
                Some(body) => Ok(Box::new(Cursor::new(body.clone()))),
                None => Err(TransportError::Status {
                    url: url.to_string(),
                    status: 404,
                }),
            }
        }
    }
}

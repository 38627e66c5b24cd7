//! AWS SQS transport implementation.
//!
//! Speaks the SQS Query API (`Version=2012-11-05`) over HTTPS with direct
//! HTTP calls signed with AWS Signature Version 4, without the AWS SDK.
//!
//! ## Supported actions
//!
//! - `CreateQueue` with `MessageRetentionPeriod` and `VisibilityTimeout`
//! - `SendMessage` with a plain text body
//! - `ReceiveMessage` with long polling and `ApproximateReceiveCount`
//! - `DeleteMessage`
//!
//! ## Credentials and endpoint
//!
//! Credentials are taken from [`AwsSqsConfig`] and fall back to the standard
//! `AWS_ACCESS_KEY_ID`, `AWS_SECRET_ACCESS_KEY` and `AWS_SESSION_TOKEN`
//! environment variables. The endpoint defaults to
//! `https://sqs.{region}.amazonaws.com` and can be pointed at LocalStack or
//! ElasticMQ through the configuration, `AWS_ENDPOINT_URL_SQS` or
//! `AWS_ENDPOINT_URL`.
//!
//! ## Example
//!
//! ```no_run
//! use sqs_pubsub_core::config::AwsSqsConfig;
//! use sqs_pubsub_core::providers::SqsTransport;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = AwsSqsConfig {
//!     region: "eu-west-1".to_string(),
//!     endpoint: Some("http://localhost:4566".to_string()),
//!     ..Default::default()
//! };
//!
//! let transport = SqsTransport::new(&config)?;
//! # Ok(())
//! # }
//! ```

use crate::config::AwsSqsConfig;
use crate::error::{Operation, TransportError};
use crate::message::{InboundMessage, MessageId, QueueAddress, QueueName, ReceiptToken};
use crate::transport::{QueueAttributes, QueueTransport};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use reqwest::Client as HttpClient;
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, instrument};
use url::Url;

#[cfg(test)]
#[path = "aws_tests.rs"]
mod tests;

type HmacSha256 = Hmac<Sha256>;

const API_VERSION: &str = "2012-11-05";

// ============================================================================
// Credentials
// ============================================================================

/// Static AWS credentials
#[derive(Clone, PartialEq, Eq)]
pub struct AwsCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: Option<String>,
}

impl fmt::Debug for AwsCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AwsCredentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .field("session_token", &self.session_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Resolve credentials from configuration, falling back to `lookup`
///
/// Returns `None` when no complete key pair is available from either source.
fn resolve_credentials(
    config: &AwsSqsConfig,
    lookup: impl Fn(&str) -> Option<String>,
) -> Option<AwsCredentials> {
    if let (Some(access_key_id), Some(secret_access_key)) =
        (&config.access_key_id, &config.secret_access_key)
    {
        return Some(AwsCredentials {
            access_key_id: access_key_id.clone(),
            secret_access_key: secret_access_key.clone(),
            session_token: config.session_token.clone(),
        });
    }

    let access_key_id = lookup("AWS_ACCESS_KEY_ID").filter(|v| !v.is_empty())?;
    let secret_access_key = lookup("AWS_SECRET_ACCESS_KEY").filter(|v| !v.is_empty())?;
    Some(AwsCredentials {
        access_key_id,
        secret_access_key,
        session_token: lookup("AWS_SESSION_TOKEN").filter(|v| !v.is_empty()),
    })
}

/// Resolve the service endpoint from configuration, falling back to `lookup`
/// and finally to the regional AWS endpoint
fn resolve_endpoint(
    config: &AwsSqsConfig,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<Url, TransportError> {
    let endpoint = config
        .endpoint
        .clone()
        .or_else(|| lookup("AWS_ENDPOINT_URL_SQS"))
        .or_else(|| lookup("AWS_ENDPOINT_URL"))
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| format!("https://sqs.{}.amazonaws.com", config.region));

    let url = Url::parse(&endpoint).map_err(|e| TransportError::Configuration {
        message: format!("invalid SQS endpoint '{}': {}", endpoint, e),
    })?;

    if url.host_str().is_none() {
        return Err(TransportError::Configuration {
            message: format!("SQS endpoint '{}' has no host", endpoint),
        });
    }

    Ok(url)
}

/// `host[:port]` as sent in the `Host` header for `url`
fn host_header(url: &Url) -> Result<String, TransportError> {
    let host = url.host_str().ok_or_else(|| TransportError::Configuration {
        message: format!("URL '{}' has no host", url),
    })?;

    Ok(match url.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    })
}

// ============================================================================
// AWS Signature V4 Signer
// ============================================================================

/// AWS Signature Version 4 signer
///
/// Implements the signing process for SQS requests:
/// 1. Create canonical request
/// 2. Create string to sign
/// 3. Derive the signing key and calculate the signature
/// 4. Build the `Authorization` header
///
/// ## References
///
/// - [AWS Signature V4](https://docs.aws.amazon.com/general/latest/gr/signature-version-4.html)
#[derive(Clone)]
struct AwsV4Signer {
    credentials: AwsCredentials,
    region: String,
    service: &'static str,
}

impl AwsV4Signer {
    fn new(credentials: AwsCredentials, region: String) -> Self {
        Self {
            credentials,
            region,
            service: "sqs",
        }
    }

    /// Sign a request with an empty query string
    ///
    /// Returns the headers to add to the request: `Authorization`,
    /// `x-amz-date` and, for temporary credentials, `x-amz-security-token`.
    fn sign_request(
        &self,
        method: &str,
        host: &str,
        path: &str,
        body: &str,
        timestamp: &DateTime<Utc>,
    ) -> Vec<(&'static str, String)> {
        let date_stamp = timestamp.format("%Y%m%d").to_string();
        let amz_date = timestamp.format("%Y%m%dT%H%M%SZ").to_string();

        // Canonical headers must be sorted by name
        let mut canonical_headers = format!("host:{}\nx-amz-date:{}\n", host, amz_date);
        let mut signed_headers = "host;x-amz-date".to_string();
        if let Some(token) = &self.credentials.session_token {
            canonical_headers.push_str(&format!("x-amz-security-token:{}\n", token));
            signed_headers.push_str(";x-amz-security-token");
        }

        let payload_hash = hex::encode(Sha256::digest(body.as_bytes()));

        let canonical_request = format!(
            "{}\n{}\n\n{}\n{}\n{}",
            method, path, canonical_headers, signed_headers, payload_hash
        );

        let algorithm = "AWS4-HMAC-SHA256";
        let credential_scope = format!(
            "{}/{}/{}/aws4_request",
            date_stamp, self.region, self.service
        );
        let string_to_sign = format!(
            "{}\n{}\n{}\n{}",
            algorithm,
            amz_date,
            credential_scope,
            hex::encode(Sha256::digest(canonical_request.as_bytes()))
        );

        let signature = self.calculate_signature(&string_to_sign, &date_stamp);

        let authorization = format!(
            "{} Credential={}/{}, SignedHeaders={}, Signature={}",
            algorithm, self.credentials.access_key_id, credential_scope, signed_headers, signature
        );

        let mut headers = vec![("Authorization", authorization), ("x-amz-date", amz_date)];
        if let Some(token) = &self.credentials.session_token {
            headers.push(("x-amz-security-token", token.clone()));
        }
        headers
    }

    /// Derive the signing key with the HMAC chain
    /// `AWS4+secret -> date -> region -> service -> aws4_request` and sign
    fn calculate_signature(&self, string_to_sign: &str, date_stamp: &str) -> String {
        let k_secret = format!("AWS4{}", self.credentials.secret_access_key);
        let k_date = hmac_sha256(k_secret.as_bytes(), date_stamp.as_bytes());
        let k_region = hmac_sha256(&k_date, self.region.as_bytes());
        let k_service = hmac_sha256(&k_region, self.service.as_bytes());
        let k_signing = hmac_sha256(&k_service, b"aws4_request");

        hex::encode(hmac_sha256(&k_signing, string_to_sign.as_bytes()))
    }
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts keys of any length");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

// ============================================================================
// SQS Transport
// ============================================================================

/// Queue transport backed by AWS SQS
///
/// Thread-safe; share it across tasks behind an `Arc`.
pub struct SqsTransport {
    http_client: HttpClient,
    signer: Option<AwsV4Signer>,
    endpoint: Url,
    region: String,
}

impl SqsTransport {
    /// Create a transport from configuration and the process environment
    ///
    /// Missing credentials are not an error here; requests then fail with
    /// [`TransportError::AuthenticationFailed`].
    pub fn new(config: &AwsSqsConfig) -> Result<Self, TransportError> {
        Self::with_lookup(config, |key| std::env::var(key).ok())
    }

    fn with_lookup(
        config: &AwsSqsConfig,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, TransportError> {
        if config.region.trim().is_empty() {
            return Err(TransportError::Configuration {
                message: "region cannot be empty".to_string(),
            });
        }

        let endpoint = resolve_endpoint(config, &lookup)?;
        let signer = resolve_credentials(config, &lookup)
            .map(|credentials| AwsV4Signer::new(credentials, config.region.clone()));

        let http_client = HttpClient::builder()
            .timeout(Duration::from_secs(config.request_timeout_seconds))
            .build()
            .map_err(|e| TransportError::Configuration {
                message: format!("failed to create HTTP client: {}", e),
            })?;

        debug!(
            endpoint = %endpoint,
            region = %config.region,
            signed = signer.is_some(),
            "Created SQS transport"
        );

        Ok(Self {
            http_client,
            signer,
            endpoint,
            region: config.region.clone(),
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// POST a signed Query API request to `url` and return the response body
    async fn call(
        &self,
        operation: Operation,
        url: &Url,
        params: Vec<(String, String)>,
    ) -> Result<String, TransportError> {
        let signer = self
            .signer
            .as_ref()
            .ok_or_else(|| TransportError::AuthenticationFailed {
                message: "no AWS credentials configured".to_string(),
            })?;

        let mut form = vec![
            ("Action".to_string(), operation.as_str().to_string()),
            ("Version".to_string(), API_VERSION.to_string()),
        ];
        form.extend(params);
        let body = form
            .iter()
            .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
            .collect::<Vec<_>>()
            .join("&");

        let host = host_header(url)?;
        let headers = signer.sign_request("POST", &host, url.path(), &body, &Utc::now());

        let mut request = self
            .http_client
            .post(url.clone())
            .header("content-type", "application/x-www-form-urlencoded");
        for (name, value) in headers {
            request = request.header(name, value);
        }

        let response = request.body(body).send().await.map_err(map_request_error)?;

        let status = response.status();
        let response_body = response.text().await.map_err(map_request_error)?;

        if !status.is_success() {
            let details = parse_error_response(&response_body);
            return Err(classify_error(status.as_u16(), details));
        }

        Ok(response_body)
    }
}

impl fmt::Debug for SqsTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SqsTransport")
            .field("endpoint", &self.endpoint.as_str())
            .field("region", &self.region)
            .field("signed", &self.signer.is_some())
            .finish()
    }
}

#[async_trait]
impl QueueTransport for SqsTransport {
    #[instrument(skip(self, attributes), fields(queue = %name))]
    async fn create_queue(
        &self,
        name: &QueueName,
        attributes: &QueueAttributes,
    ) -> Result<QueueAddress, TransportError> {
        let mut params = vec![("QueueName".to_string(), name.as_str().to_string())];
        for (index, (attribute, value)) in attributes.to_pairs().into_iter().enumerate() {
            let n = index + 1;
            params.push((format!("Attribute.{}.Name", n), attribute.to_string()));
            params.push((format!("Attribute.{}.Value", n), value));
        }
        if name.is_fifo() {
            let n = params.len() / 2 + 1;
            params.push((format!("Attribute.{}.Name", n), "FifoQueue".to_string()));
            params.push((format!("Attribute.{}.Value", n), "true".to_string()));
        }

        let endpoint = self.endpoint.clone();
        let response = self.call(Operation::CreateQueue, &endpoint, params).await?;
        parse_create_queue_response(&response)
    }

    async fn send_message(
        &self,
        address: &QueueAddress,
        body: &str,
    ) -> Result<MessageId, TransportError> {
        let params = vec![
            ("QueueUrl".to_string(), address.as_str().to_string()),
            ("MessageBody".to_string(), body.to_string()),
        ];

        let response = self
            .call(Operation::SendMessage, address.as_url(), params)
            .await?;
        parse_send_message_response(&response)
    }

    async fn receive_messages(
        &self,
        address: &QueueAddress,
        max_messages: u32,
        wait: Duration,
    ) -> Result<Vec<InboundMessage>, TransportError> {
        let params = vec![
            ("QueueUrl".to_string(), address.as_str().to_string()),
            ("MaxNumberOfMessages".to_string(), max_messages.to_string()),
            ("WaitTimeSeconds".to_string(), wait.as_secs().to_string()),
            (
                "AttributeName.1".to_string(),
                "ApproximateReceiveCount".to_string(),
            ),
        ];

        let response = self
            .call(Operation::ReceiveMessage, address.as_url(), params)
            .await?;
        parse_receive_message_response(&response)
    }

    async fn delete_message(
        &self,
        address: &QueueAddress,
        receipt: &ReceiptToken,
    ) -> Result<(), TransportError> {
        let params = vec![
            ("QueueUrl".to_string(), address.as_str().to_string()),
            ("ReceiptHandle".to_string(), receipt.as_str().to_string()),
        ];

        self.call(Operation::DeleteMessage, address.as_url(), params)
            .await?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "aws-sqs"
    }
}

// ============================================================================
// Error Mapping
// ============================================================================

/// `Code` and `Message` of an SQS `ErrorResponse`
#[derive(Debug, Clone, PartialEq, Eq)]
struct ErrorDetails {
    code: String,
    message: String,
}

fn map_request_error(error: reqwest::Error) -> TransportError {
    if error.is_timeout() {
        TransportError::Timeout {
            message: error.to_string(),
        }
    } else {
        TransportError::ConnectionFailed {
            message: error.to_string(),
        }
    }
}

/// Map an SQS error code and HTTP status to a classified transport error
fn classify_error(status: u16, details: ErrorDetails) -> TransportError {
    let ErrorDetails { code, message } = details;

    match code.as_str() {
        "ThrottlingException" | "Throttling" | "RequestThrottled" | "OverLimit"
        | "AWS.SimpleQueueService.RequestThrottled" => {
            return TransportError::Throttled { code, message }
        }
        "ServiceUnavailable" | "InternalError" | "InternalFailure" => {
            return TransportError::ServiceUnavailable {
                status,
                code,
                message,
            }
        }
        "AWS.SimpleQueueService.NonExistentQueue" | "QueueDoesNotExist" => {
            return TransportError::QueueNotFound { message }
        }
        "QueueAlreadyExists" | "AWS.SimpleQueueService.QueueNameExists" => {
            return TransportError::QueueAlreadyExists { message }
        }
        "InvalidClientTokenId"
        | "UnrecognizedClientException"
        | "SignatureDoesNotMatch"
        | "MissingAuthenticationToken"
        | "IncompleteSignature"
        | "ExpiredToken" => {
            return TransportError::AuthenticationFailed {
                message: format!("{}: {}", code, message),
            }
        }
        "AccessDenied" | "AccessDeniedException" => {
            return TransportError::PermissionDenied { code, message }
        }
        "InvalidReceiptHandle" | "ReceiptHandleIsInvalid" => {
            return TransportError::InvalidReceipt { message }
        }
        _ => {}
    }

    match status {
        429 => TransportError::Throttled { code, message },
        401 => TransportError::AuthenticationFailed {
            message: format!("{}: {}", code, message),
        },
        403 => TransportError::PermissionDenied { code, message },
        s if s >= 500 => TransportError::ServiceUnavailable {
            status,
            code,
            message,
        },
        _ => TransportError::BadRequest { code, message },
    }
}

// ============================================================================
// XML Response Parsing
// ============================================================================

fn malformed(message: impl Into<String>) -> TransportError {
    TransportError::MalformedResponse {
        message: message.into(),
    }
}

/// Text content of the first `element` in `xml`
fn first_element_text(xml: &str, element: &[u8]) -> Result<Option<String>, TransportError> {
    use quick_xml::events::Event;
    use quick_xml::Reader;

    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut inside = false;
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) if e.name().as_ref() == element => inside = true,
            Ok(Event::Text(e)) if inside => {
                return e
                    .unescape()
                    .map(|s| Some(s.into_owned()))
                    .map_err(|e| malformed(format!("failed to unescape XML text: {}", e)));
            }
            Ok(Event::End(ref e)) if e.name().as_ref() == element => inside = false,
            Ok(Event::Eof) => return Ok(None),
            Err(e) => return Err(malformed(format!("XML parsing error: {}", e))),
            _ => {}
        }
        buf.clear();
    }
}

/// Parse a `CreateQueueResponse` into the queue address
fn parse_create_queue_response(xml: &str) -> Result<QueueAddress, TransportError> {
    let url = first_element_text(xml, b"QueueUrl")?
        .ok_or_else(|| malformed("QueueUrl not found in CreateQueue response"))?;

    QueueAddress::parse(&url).map_err(|e| malformed(format!("invalid QueueUrl '{}': {}", url, e)))
}

/// Parse a `SendMessageResponse` into the assigned message id
fn parse_send_message_response(xml: &str) -> Result<MessageId, TransportError> {
    let id = first_element_text(xml, b"MessageId")?
        .ok_or_else(|| malformed("MessageId not found in SendMessage response"))?;

    MessageId::from_str(&id).map_err(|e| malformed(format!("invalid MessageId: {}", e)))
}

/// Parse an `ErrorResponse`; missing fields become `Unknown`
fn parse_error_response(xml: &str) -> ErrorDetails {
    use quick_xml::events::Event;
    use quick_xml::Reader;

    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut error_code = None;
    let mut error_message = None;
    let mut in_error = false;
    let mut in_code = false;
    let mut in_message = false;
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => match e.name().as_ref() {
                b"Error" => in_error = true,
                b"Code" if in_error => in_code = true,
                b"Message" if in_error => in_message = true,
                _ => {}
            },
            Ok(Event::Text(e)) => {
                if in_code {
                    error_code = e.unescape().ok().map(|s| s.into_owned());
                    in_code = false;
                } else if in_message {
                    error_message = e.unescape().ok().map(|s| s.into_owned());
                    in_message = false;
                }
            }
            Ok(Event::End(ref e)) => match e.name().as_ref() {
                b"Error" => in_error = false,
                b"Code" => in_code = false,
                b"Message" => in_message = false,
                _ => {}
            },
            Ok(Event::Eof) | Err(_) => break,
            _ => {}
        }
        buf.clear();
    }

    ErrorDetails {
        code: error_code.unwrap_or_else(|| "Unknown".to_string()),
        message: error_message.unwrap_or_else(|| "Unknown error".to_string()),
    }
}

/// Fields of one `<Message>` collected while parsing
#[derive(Default)]
struct MessageFields {
    message_id: Option<String>,
    receipt_handle: Option<String>,
    body: Option<String>,
    receive_count: Option<u32>,
}

impl MessageFields {
    fn build(self) -> Result<InboundMessage, TransportError> {
        let id = self
            .message_id
            .ok_or_else(|| malformed("Message without MessageId in ReceiveMessage response"))?;
        let receipt = self
            .receipt_handle
            .ok_or_else(|| malformed("Message without ReceiptHandle in ReceiveMessage response"))?;

        Ok(InboundMessage {
            id: MessageId::from_str(&id).map_err(|e| malformed(format!("invalid MessageId: {}", e)))?,
            body: self.body.unwrap_or_default(),
            receipt: ReceiptToken::new(receipt),
            receive_count: self.receive_count,
        })
    }
}

/// Parse a `ReceiveMessageResponse`; an empty result yields an empty vector
fn parse_receive_message_response(xml: &str) -> Result<Vec<InboundMessage>, TransportError> {
    use quick_xml::events::Event;
    use quick_xml::Reader;

    #[derive(Clone, Copy, PartialEq)]
    enum Field {
        None,
        MessageId,
        ReceiptHandle,
        Body,
        AttributeName,
        AttributeValue,
    }

    // Bodies are plain text, so whitespace inside <Body> is significant
    let mut reader = Reader::from_str(xml);
    reader.trim_text(false);

    let mut messages = Vec::new();
    let mut current: Option<MessageFields> = None;
    let mut field = Field::None;
    let mut text = String::new();
    let mut attribute_name: Option<String> = None;
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => {
                field = match e.name().as_ref() {
                    b"Message" => {
                        current = Some(MessageFields::default());
                        Field::None
                    }
                    b"MessageId" if current.is_some() => Field::MessageId,
                    b"ReceiptHandle" if current.is_some() => Field::ReceiptHandle,
                    b"Body" if current.is_some() => Field::Body,
                    b"Name" if current.is_some() => Field::AttributeName,
                    b"Value" if current.is_some() => Field::AttributeValue,
                    _ => Field::None,
                };
                text.clear();
            }
            Ok(Event::Text(e)) if field != Field::None => {
                let unescaped = e
                    .unescape()
                    .map_err(|e| malformed(format!("failed to unescape XML text: {}", e)))?;
                text.push_str(&unescaped);
            }
            Ok(Event::CData(e)) if field != Field::None => {
                text.push_str(&String::from_utf8_lossy(&e.into_inner()));
            }
            Ok(Event::End(ref e)) => {
                if let Some(fields) = current.as_mut() {
                    let value = std::mem::take(&mut text);
                    match field {
                        Field::MessageId => fields.message_id = Some(value),
                        Field::ReceiptHandle => fields.receipt_handle = Some(value),
                        Field::Body => fields.body = Some(value),
                        Field::AttributeName => attribute_name = Some(value),
                        Field::AttributeValue => {
                            if attribute_name.as_deref() == Some("ApproximateReceiveCount") {
                                fields.receive_count = value.trim().parse().ok();
                            }
                        }
                        Field::None => {}
                    }
                }
                field = Field::None;

                match e.name().as_ref() {
                    b"Message" => {
                        if let Some(fields) = current.take() {
                            messages.push(fields.build()?);
                        }
                    }
                    b"Attribute" => attribute_name = None,
                    _ => {}
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(malformed(format!("XML parsing error: {}", e))),
            _ => {}
        }
        buf.clear();
    }

    Ok(messages)
}

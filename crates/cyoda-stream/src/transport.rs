//! Stream transport.
//!
//! [`StreamConnector`] opens one bidirectional stream per connection attempt.
//! [`GrpcConnector`] is the production implementation over tonic.

use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};
use tonic::metadata::{Ascii, MetadataValue};
use tonic::transport::{ClientTlsConfig, Endpoint};
use tonic::{Request, Status};
use tracing::{debug, info};

use crate::config::GrpcConfig;
use crate::credentials::Credential;
use crate::envelope::Envelope;
use crate::error::StreamError;
use crate::pb::{cloud_event, CloudEvent, CloudEventsServiceClient};

/// Inbound half of an open stream. Ends when the peer closes cleanly.
pub type InboundStream = BoxStream<'static, Result<Envelope, StreamError>>;

#[async_trait]
pub trait StreamConnector: Send + Sync {
    /// Open a stream authenticated with `credential`, sending `outbound` as
    /// the request side.
    async fn open(
        &self,
        credential: &Credential,
        outbound: BoxStream<'static, Envelope>,
    ) -> Result<InboundStream, StreamError>;
}

/// Connects to the platform `CloudEventsService`.
#[derive(Clone, Debug)]
pub struct GrpcConnector {
    config: GrpcConfig,
}

impl GrpcConnector {
    pub fn new(config: GrpcConfig) -> Self {
        Self { config }
    }

    fn endpoint(&self) -> Result<Endpoint, StreamError> {
        let mut endpoint = Endpoint::from_shared(self.config.endpoint.clone())?
            .http2_keep_alive_interval(self.config.keep_alive_interval())
            .keep_alive_timeout(self.config.keep_alive_timeout())
            .keep_alive_while_idle(self.config.keep_alive_while_idle)
            .connect_timeout(self.config.connect_timeout());

        if endpoint.uri().scheme_str() == Some("https") {
            endpoint = endpoint.tls_config(ClientTlsConfig::new().with_native_roots())?;
        }
        Ok(endpoint)
    }
}

#[async_trait]
impl StreamConnector for GrpcConnector {
    async fn open(
        &self,
        credential: &Credential,
        outbound: BoxStream<'static, Envelope>,
    ) -> Result<InboundStream, StreamError> {
        let authorization: MetadataValue<Ascii> = credential
            .bearer()
            .parse()
            .map_err(|e| StreamError::Credential(format!("token is not a valid header: {e}")))?;
        let outbound: BoxStream<'static, CloudEvent> = outbound.map(CloudEvent::from).boxed();
        let mut request = Request::new(outbound);
        request.metadata_mut().insert("authorization", authorization);

        debug!(endpoint = %self.config.endpoint, "connecting");
        let channel = self.endpoint()?.connect().await?;
        let mut client = CloudEventsServiceClient::new(channel)
            .max_decoding_message_size(self.config.max_message_bytes)
            .max_encoding_message_size(self.config.max_message_bytes);

        let start: futures::future::BoxFuture<
            '_,
            Result<tonic::Response<tonic::Streaming<CloudEvent>>, Status>,
        > = Box::pin(client.start_streaming(request));
        let response = start.await?;
        info!(endpoint = %self.config.endpoint, "stream established");

        Ok(response.into_inner().map(inbound_envelope).boxed())
    }
}

fn inbound_envelope(item: Result<CloudEvent, Status>) -> Result<Envelope, StreamError> {
    item.map(Envelope::from).map_err(StreamError::from)
}

impl From<Envelope> for CloudEvent {
    fn from(envelope: Envelope) -> Self {
        Self {
            id: envelope.id().to_string(),
            source: envelope.source().to_string(),
            spec_version: envelope.spec_version().to_string(),
            r#type: envelope.event_type().to_string(),
            data: Some(cloud_event::Data::TextData(envelope.payload().to_string())),
        }
    }
}

impl From<CloudEvent> for Envelope {
    fn from(event: CloudEvent) -> Self {
        let payload = match event.data {
            Some(cloud_event::Data::TextData(text)) => text,
            Some(cloud_event::Data::BinaryData(bytes)) => {
                String::from_utf8_lossy(&bytes).into_owned()
            }
            None => String::new(),
        };
        Envelope::new(event.id, event.source, event.spec_version, event.r#type, payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;

    #[test]
    fn outbound_envelopes_carry_text_data() {
        let envelope = Envelope::new("E1", "SimpleSample", "1.0", "EventAckResponse", "{}");
        let event = CloudEvent::from(envelope.clone());

        assert_eq!(event.r#type, "EventAckResponse");
        assert_eq!(event.data, Some(cloud_event::Data::TextData("{}".into())));
        assert_eq!(Envelope::from(event), envelope);
    }

    #[test]
    fn binary_and_empty_data_are_accepted_inbound() {
        let binary = CloudEvent {
            id: "E2".into(),
            source: "platform".into(),
            spec_version: "1.0".into(),
            r#type: "CalculationMemberGreetEvent".into(),
            data: Some(cloud_event::Data::BinaryData(br#"{"a":1}"#.to_vec())),
        };
        assert_eq!(Envelope::from(binary).payload(), r#"{"a":1}"#);

        let empty = CloudEvent {
            id: "E3".into(),
            data: None,
            ..Default::default()
        };
        assert_eq!(Envelope::from(empty).payload(), "");
    }

    #[test]
    fn https_endpoints_enable_tls() {
        let connector = GrpcConnector::new(GrpcConfig::default());
        let endpoint = connector.endpoint().unwrap();
        assert_eq!(endpoint.uri().scheme_str(), Some("https"));
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_a_transport_error() {
        let connector = GrpcConnector::new(GrpcConfig {
            endpoint: "http://127.0.0.1:9".to_string(),
            connect_timeout_secs: 1,
            ..Default::default()
        });

        let result = connector
            .open(&Credential::new("t"), stream::empty().boxed())
            .await;
        match result {
            Err(err) => assert_eq!(err.kind(), "transport"),
            Ok(_) => panic!("connect to a closed port must fail"),
        }
    }
}

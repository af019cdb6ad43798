//! Identity handshake.
//!
//! Runs once per stream, before any connection exists, and yields the
//! verified peer identity both sides need to construct one. The exchange is
//! symmetric in outcome but the accepting side always opens, since it has no
//! prior knowledge of who connected:
//!
//! ```text
//! Accepting side                    Dialing side
//!     |                                  |
//!     |------ RequestPeerInfo ---------->|
//!     |                                  |
//!     |<----- ResponsePeerInfo ----------|  (signed PeerInfo)
//!     |                                  |
//!     |------ ResponsePeerInfo --------->|  (signed PeerInfo)
//!     |                                  |
//!     |      [identities verified]       |
//! ```
//!
//! Every receive is bounded by a timeout. Any failing step closes the stream
//! and returns the originating error; a partial handshake never leaks a
//! usable connection.

use std::time::Duration;

use causeway_crypto::{Crypto, Signature, VerifyingKey};
use causeway_transport::{Envelope, EnvelopeKind, MessageStream};

use crate::config::HandshakeConfig;
use crate::error::{Error, Result};
use crate::peer_info::{HostInfo, PeerInfo};

/// The verified identity a successful handshake produces.
#[derive(Debug, Clone)]
pub struct HandshakeOutcome {
    /// The peer's recovered and verified public key
    pub peer_key: VerifyingKey,
    /// The full identity payload the peer sent
    pub peer_info: PeerInfo,
}

/// Run the accepting side of the handshake.
///
/// Sends the `RequestPeerInfo` opener, waits for the peer's identity, then
/// answers with our own.
///
/// # Errors
///
/// Closes the stream and returns the failing step's error:
/// [`Error::HandshakeTimeout`], [`Error::NotExpectedMessage`],
/// [`Error::InvalidPeerInfo`], or a transport error.
pub async fn responder<S: MessageStream>(
    stream: &S,
    local: &HostInfo,
    crypto: &Crypto,
    config: &HandshakeConfig,
) -> Result<HandshakeOutcome> {
    close_on_error(stream, responder_steps(stream, local, crypto, config)).await
}

/// Run the dialing side of the handshake.
///
/// Waits for the accepting side's opener, answers with our identity, then
/// waits for the peer's.
///
/// # Errors
///
/// Same failure surface as [`responder`].
pub async fn initiator<S: MessageStream>(
    stream: &S,
    local: &HostInfo,
    crypto: &Crypto,
    config: &HandshakeConfig,
) -> Result<HandshakeOutcome> {
    close_on_error(stream, initiator_steps(stream, local, crypto, config)).await
}

async fn close_on_error<S: MessageStream>(
    stream: &S,
    steps: impl Future<Output = Result<HandshakeOutcome>>,
) -> Result<HandshakeOutcome> {
    match steps.await {
        Ok(outcome) => {
            tracing::debug!(
                peer_address = %outcome.peer_info.address,
                "handshake complete"
            );
            Ok(outcome)
        }
        Err(error) => {
            tracing::warn!("handshake failed: {}", error);
            stream.close().await;
            Err(error)
        }
    }
}

async fn responder_steps<S: MessageStream>(
    stream: &S,
    local: &HostInfo,
    crypto: &Crypto,
    config: &HandshakeConfig,
) -> Result<HandshakeOutcome> {
    stream.send(Envelope::request_peer_info()).await?;

    let envelope = recv_with_timeout(stream, config.response_timeout).await?;
    if envelope.kind != EnvelopeKind::ResponsePeerInfo {
        return Err(Error::NotExpectedMessage(envelope.kind));
    }
    let outcome = decode_peer_identity(&envelope, crypto)?;

    stream.send(identity_envelope(local, crypto)?).await?;

    Ok(outcome)
}

async fn initiator_steps<S: MessageStream>(
    stream: &S,
    local: &HostInfo,
    crypto: &Crypto,
    config: &HandshakeConfig,
) -> Result<HandshakeOutcome> {
    let envelope = recv_with_timeout(stream, config.request_timeout).await?;
    if envelope.kind != EnvelopeKind::RequestPeerInfo {
        return Err(Error::NotExpectedMessage(envelope.kind));
    }

    stream.send(identity_envelope(local, crypto)?).await?;

    let envelope = recv_with_timeout(stream, config.response_timeout).await?;
    if envelope.kind != EnvelopeKind::ResponsePeerInfo {
        return Err(Error::NotExpectedMessage(envelope.kind));
    }
    decode_peer_identity(&envelope, crypto)
}

/// Build our signed identity envelope.
fn identity_envelope(local: &HostInfo, crypto: &Crypto) -> Result<Envelope> {
    let payload = local.to_peer_info().to_payload()?;
    let signature = crypto.signer.sign(&payload)?;
    Ok(Envelope::response_peer_info(
        payload,
        signature.to_vec(),
        local.public_key.to_bytes().to_vec(),
    ))
}

/// Decode a `ResponsePeerInfo` payload, recover the peer's key, and check
/// the envelope signature against it. The signature check proves the peer
/// holds the private half of the key it claims.
fn decode_peer_identity(envelope: &Envelope, crypto: &Crypto) -> Result<HandshakeOutcome> {
    let peer_info = PeerInfo::from_payload(&envelope.payload)?;
    let peer_key = peer_info.recover_key(crypto.key_recoverer.as_ref())?;

    let signature = Signature::from_slice(&envelope.signature)
        .map_err(|err| Error::InvalidPeerInfo(err.to_string()))?;
    peer_key
        .verify(&envelope.payload, &signature)
        .map_err(|_| Error::InvalidPeerInfo("identity signature mismatch".to_string()))?;

    Ok(HandshakeOutcome {
        peer_key,
        peer_info,
    })
}

async fn recv_with_timeout<S: MessageStream>(stream: &S, deadline: Duration) -> Result<Envelope> {
    match tokio::time::timeout(deadline, stream.recv()).await {
        Ok(received) => received.map_err(Error::from),
        Err(_) => Err(Error::HandshakeTimeout(deadline)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use causeway_crypto::SigningKey;
    use causeway_transport::TransportError;
    use causeway_transport::memory;
    use rand_core::OsRng;
    use std::time::Duration;

    struct Node {
        host: HostInfo,
        crypto: Crypto,
    }

    fn node(address: &str) -> Node {
        let signing_key = SigningKey::generate(&mut OsRng);
        let public_key = signing_key.verifying_key();
        Node {
            host: HostInfo::new(address.parse().unwrap(), public_key)
                .with_metadata("role", "full"),
            crypto: Crypto::ed25519(signing_key),
        }
    }

    fn fast_config() -> HandshakeConfig {
        HandshakeConfig {
            request_timeout: Duration::from_millis(500),
            response_timeout: Duration::from_millis(500),
        }
    }

    #[tokio::test]
    async fn test_both_sides_learn_each_other() {
        let server = node("127.0.0.1:4000");
        let client = node("127.0.0.1:5000");
        let (server_stream, client_stream) = memory::pair();

        let server_task = tokio::spawn({
            let (host, crypto) = (server.host.clone(), server.crypto.clone());
            async move { responder(&server_stream, &host, &crypto, &fast_config()).await }
        });

        let client_outcome = initiator(&client_stream, &client.host, &client.crypto, &fast_config())
            .await
            .unwrap();
        let server_outcome = server_task.await.unwrap().unwrap();

        assert_eq!(client_outcome.peer_key, server.host.public_key);
        assert_eq!(server_outcome.peer_key, client.host.public_key);
        assert_eq!(server_outcome.peer_info.address, "127.0.0.1:5000");
        assert_eq!(server_outcome.peer_info.metadata["role"], "full");
        assert!(!server_outcome.peer_info.is_private);
    }

    #[tokio::test]
    async fn test_initiator_rejects_wrong_opener() {
        let client = node("127.0.0.1:5000");
        let (remote, client_stream) = memory::pair();

        // A normal envelope instead of the RequestPeerInfo opener.
        remote.send(Envelope::default()).await.unwrap();

        let err = initiator(&client_stream, &client.host, &client.crypto, &fast_config())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::NotExpectedMessage(EnvelopeKind::Normal)
        ));
    }

    #[tokio::test]
    async fn test_responder_rejects_wrong_response() {
        let server = node("127.0.0.1:4000");
        let (server_stream, remote) = memory::pair();

        let server_task = tokio::spawn({
            let (host, crypto) = (server.host.clone(), server.crypto.clone());
            async move { responder(&server_stream, &host, &crypto, &fast_config()).await }
        });

        // Consume the opener, then answer with the wrong type.
        assert_eq!(
            remote.recv().await.unwrap().kind,
            EnvelopeKind::RequestPeerInfo
        );
        remote
            .send(Envelope::request_peer_info())
            .await
            .unwrap();

        let err = server_task.await.unwrap().unwrap_err();
        assert!(matches!(
            err,
            Error::NotExpectedMessage(EnvelopeKind::RequestPeerInfo)
        ));
    }

    #[tokio::test]
    async fn test_garbage_peer_info_fails() {
        let server = node("127.0.0.1:4000");
        let (server_stream, remote) = memory::pair();

        let server_task = tokio::spawn({
            let (host, crypto) = (server.host.clone(), server.crypto.clone());
            async move { responder(&server_stream, &host, &crypto, &fast_config()).await }
        });

        remote.recv().await.unwrap();
        remote
            .send(Envelope::response_peer_info(
                b"not peer info".to_vec(),
                vec![0u8; 64],
                Vec::new(),
            ))
            .await
            .unwrap();

        let err = server_task.await.unwrap().unwrap_err();
        assert!(matches!(err, Error::InvalidPeerInfo(_)));
    }

    #[tokio::test]
    async fn test_claimed_key_without_private_half_fails() {
        let server = node("127.0.0.1:4000");
        let honest = node("127.0.0.1:5000");
        let liar = node("127.0.0.1:6000");
        let (server_stream, remote) = memory::pair();

        let server_task = tokio::spawn({
            let (host, crypto) = (server.host.clone(), server.crypto.clone());
            async move { responder(&server_stream, &host, &crypto, &fast_config()).await }
        });

        remote.recv().await.unwrap();

        // The liar claims the honest node's key but can only sign with its
        // own.
        let payload = honest.host.to_peer_info().to_payload().unwrap();
        let forged = liar.crypto.signer.sign(&payload).unwrap();
        remote
            .send(Envelope::response_peer_info(
                payload,
                forged.to_vec(),
                honest.host.public_key.to_bytes().to_vec(),
            ))
            .await
            .unwrap();

        let err = server_task.await.unwrap().unwrap_err();
        assert!(matches!(err, Error::InvalidPeerInfo(_)));
    }

    #[tokio::test]
    async fn test_silent_peer_times_out() {
        let server = node("127.0.0.1:4000");
        let (server_stream, _remote) = memory::pair();

        let config = HandshakeConfig {
            response_timeout: Duration::from_millis(50),
            ..fast_config()
        };
        let err = responder(&server_stream, &server.host, &server.crypto, &config)
            .await
            .unwrap_err();

        assert!(matches!(err, Error::HandshakeTimeout(_)));
    }

    #[tokio::test]
    async fn test_failed_handshake_closes_stream() {
        let server = node("127.0.0.1:4000");
        let (server_stream, remote) = memory::pair();

        let config = HandshakeConfig {
            response_timeout: Duration::from_millis(50),
            ..fast_config()
        };
        responder(&server_stream, &server.host, &server.crypto, &config)
            .await
            .unwrap_err();

        // Drain the opener, then observe the hangup.
        remote.recv().await.unwrap();
        assert_eq!(remote.recv().await, Err(TransportError::Closed));
    }
}

use super::tls::{load_tls_material, TlsMaterial};
use crate::config::BrokerConfig;
use crate::error::{BrokerError, VigilError};
use crate::retry::RetryPolicy;
use lapin::tcp::{HandshakeResult, TcpStream};
use lapin::uri::{
    AMQPAuthority, AMQPQueryString, AMQPScheme, AMQPUri, AMQPUserInfo, SASLMechanism,
};
use lapin::{Channel, Connection, ConnectionProperties};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Open broker connection, owned by exactly one processing node
pub struct BrokerConnection {
    connection: Connection,
    tls: bool,
}

impl BrokerConnection {
    /// Open a new channel on this connection
    pub async fn open_channel(&self) -> Result<Channel, BrokerError> {
        self.connection
            .create_channel()
            .await
            .map_err(BrokerError::from)
    }

    pub fn is_connected(&self) -> bool {
        self.connection.status().connected()
    }

    pub fn is_tls(&self) -> bool {
        self.tls
    }

    /// Close the connection, logging instead of failing when already gone
    pub async fn close(&self) {
        if !self.is_connected() {
            debug!("Broker connection already closed");
            return;
        }

        match self.connection.close(200, "vigil shutdown").await {
            Ok(()) => info!("Broker connection closed"),
            Err(e) => warn!("Error while closing broker connection: {}", e),
        }
    }
}

/// Build the connection URI for the given transport.
///
/// TLS connections authenticate with SASL EXTERNAL, identity being taken from
/// the client certificate; plain ones use username and password.
pub fn amqp_uri(config: &BrokerConfig, tls: bool) -> AMQPUri {
    AMQPUri {
        scheme: if tls {
            AMQPScheme::AMQPS
        } else {
            AMQPScheme::AMQP
        },
        authority: AMQPAuthority {
            userinfo: AMQPUserInfo {
                username: config.username.clone(),
                password: config.password.clone(),
            },
            host: config.host.clone(),
            port: config.port,
        },
        vhost: config.vhost.clone(),
        query: AMQPQueryString {
            heartbeat: Some(config.heartbeat_seconds),
            connection_timeout: Some(config.connection_timeout_ms),
            auth_mechanism: Some(if tls {
                SASLMechanism::External
            } else {
                SASLMechanism::Plain
            }),
            ..AMQPQueryString::default()
        },
    }
}

/// Connect to the broker with bounded retry.
///
/// TLS is selected when the configured port is the TLS port. Certificate
/// material is loaded once before the first attempt and a failure there is
/// returned immediately. Transport, TLS and protocol failures are retried
/// with a fixed delay until `max_attempts` is reached.
pub async fn connect(config: &BrokerConfig) -> Result<BrokerConnection, VigilError> {
    let tls = if config.uses_tls() {
        Some(load_tls_material(config)?)
    } else {
        None
    };

    let uri = amqp_uri(config, tls.is_some());
    let policy = RetryPolicy::fixed(
        config.max_attempts,
        Duration::from_secs(config.retry_delay_seconds),
    );

    info!(
        host = %config.host,
        port = config.port,
        tls = tls.is_some(),
        "Connecting to broker"
    );

    let connection = policy
        .run("Broker connection", |attempt| {
            let uri = uri.clone();
            let tls = tls.clone();
            async move {
                debug!(attempt, "Opening broker connection");
                connect_once(uri, tls).await
            }
        })
        .await?;

    info!(host = %config.host, port = config.port, "Connected to broker");

    Ok(BrokerConnection {
        connection,
        tls: tls.is_some(),
    })
}

async fn connect_once(uri: AMQPUri, tls: Option<TlsMaterial>) -> Result<Connection, BrokerError> {
    let properties = ConnectionProperties::default().with_connection_name("vigil".into());

    let result = match tls {
        Some(material) => {
            Connection::connector(
                uri,
                Box::new(move |uri: &AMQPUri| tls_stream(uri, &material)),
                properties,
            )
            .await
        }
        None => Connection::connect_uri(uri, properties).await,
    };

    result.map_err(BrokerError::from)
}

/// Blocking TCP connect followed by the rustls handshake against the
/// configured server name
fn tls_stream(uri: &AMQPUri, material: &TlsMaterial) -> HandshakeResult {
    let addr = format!("{}:{}", uri.authority.host, uri.authority.port);
    let stream = match uri.query.connection_timeout {
        Some(ms) => TcpStream::connect_timeout(addr.as_str(), Duration::from_millis(ms)),
        None => TcpStream::connect(addr.as_str()),
    }?;

    let stream = stream.into_rustls(&material.connector, &material.server_name)?;
    stream.set_nonblocking(true)?;
    Ok(stream)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::VigilConfig;
    use crate::error::CertificateError;

    #[test]
    fn test_uri_for_tls_uses_external_auth() {
        let mut config = VigilConfig::default().broker;
        config.host = "rabbitmq".to_string();

        let uri = amqp_uri(&config, true);
        assert_eq!(uri.scheme, AMQPScheme::AMQPS);
        assert_eq!(uri.authority.host, "rabbitmq");
        assert_eq!(uri.authority.port, 5671);
        assert_eq!(uri.vhost, "/");
        assert_eq!(uri.query.heartbeat, Some(600));
        assert_eq!(uri.query.auth_mechanism, Some(SASLMechanism::External));
    }

    #[test]
    fn test_uri_for_plain_uses_credentials() {
        let mut config = VigilConfig::default().broker;
        config.port = 5672;
        config.username = "node".to_string();

        let uri = amqp_uri(&config, false);
        assert_eq!(uri.scheme, AMQPScheme::AMQP);
        assert_eq!(uri.authority.userinfo.username, "node");
        assert_eq!(uri.query.auth_mechanism, Some(SASLMechanism::Plain));
    }

    #[tokio::test]
    async fn test_certificate_failure_is_immediate() {
        let config = VigilConfig::default().broker;
        assert!(config.uses_tls());

        let started = std::time::Instant::now();
        let err = connect(&config).await.err().unwrap();
        assert!(matches!(
            err,
            VigilError::Certificate(CertificateError::Missing { .. })
        ));
        assert!(err.is_fatal());
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_unreachable_broker_exhausts_attempts() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let mut config = VigilConfig::default().broker;
        config.host = "127.0.0.1".to_string();
        config.port = port;
        config.max_attempts = 2;
        config.retry_delay_seconds = 0;
        config.connection_timeout_ms = 500;

        let err = connect(&config).await.err().unwrap();
        assert!(matches!(
            err,
            VigilError::Broker(BrokerError::Exhausted { attempts: 2 })
        ));
        assert!(err.is_fatal());
    }
}

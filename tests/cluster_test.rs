//! Exercises the cluster coordinator end-to-end (§4.F, §8) against a
//! mock server that plays both the bootstrap seed and the sole cluster
//! node, speaking the real length-prefixed-protobuf wire protocol.

use pkv_client::codec::Value;
use pkv_client::proto::{Error as WireError, GetResponse, Request, VectorClock, Versioned};
use pkv_client::{ClientError, ClusterClientConfig, Cluster, Error};
use prost::Message;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

async fn serve_one_node(listener: TcpListener, cluster_xml: String, stores_xml: String) {
    loop {
        let Ok((stream, _)) = listener.accept().await else { return };
        let cluster_xml = cluster_xml.clone();
        let stores_xml = stores_xml.clone();
        tokio::spawn(handle_connection(stream, cluster_xml, stores_xml));
    }
}

async fn handle_connection(mut stream: TcpStream, cluster_xml: String, stores_xml: String) {
    let mut tag = [0u8; 3];
    if stream.read_exact(&mut tag).await.is_err() {
        return;
    }
    if stream.write_all(b"ok").await.is_err() {
        return;
    }

    loop {
        let mut len_buf = [0u8; 4];
        if stream.read_exact(&mut len_buf).await.is_err() {
            return;
        }
        let len = u32::from_be_bytes(len_buf) as usize;
        let mut body = vec![0u8; len];
        if stream.read_exact(&mut body).await.is_err() {
            return;
        }

        let Ok(request) = Request::decode(body.as_slice()) else { return };
        let response = build_response(&request, &cluster_xml, &stores_xml);
        let encoded = response.encode_to_vec();
        let mut out = Vec::with_capacity(4 + encoded.len());
        out.extend_from_slice(&(encoded.len() as u32).to_be_bytes());
        out.extend_from_slice(&encoded);
        if stream.write_all(&out).await.is_err() {
            return;
        }
    }
}

fn build_response(request: &Request, cluster_xml: &str, stores_xml: &str) -> GetResponse {
    let key = request.get.as_ref().map(|g| g.key.clone()).unwrap_or_default();

    let found = if request.store == "metadata" {
        match key.as_slice() {
            b"cluster.xml" => Some(cluster_xml.as_bytes().to_vec()),
            b"stores.xml" => Some(stores_xml.as_bytes().to_vec()),
            _ => None,
        }
    } else if request.store == "users" && key.as_slice() == b"alice" {
        Some(b"alice-value".to_vec())
    } else if request.store == "broken" {
        return GetResponse { versioned: vec![], error: Some(WireError { error_code: 500, error_message: "simulated fault".into() }) };
    } else {
        None
    };

    match found {
        Some(value) => GetResponse {
            versioned: vec![Versioned { value, version: Some(VectorClock { entries: vec![], timestamp: Some(1) }) }],
            error: None,
        },
        None => GetResponse { versioned: vec![], error: None },
    }
}

async fn bootstrapped_cluster() -> (std::sync::Arc<Cluster>, tokio::task::JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let cluster_xml = format!(
        "<cluster><name>test</name><server><id>0</id><host>127.0.0.1</host><socket-port>{}</socket-port><partitions>0</partitions></server></cluster>",
        addr.port()
    );
    let stores_xml = r#"
        <stores>
          <store>
            <name>users</name>
            <persistence>read-only</persistence>
            <routing-strategy>consistent-routing</routing-strategy>
            <replication-factor>1</replication-factor>
            <key-serializer><type>identity</type><compression><type>none</type></compression></key-serializer>
            <value-serializer><type>identity</type><compression><type>none</type></compression></value-serializer>
          </store>
          <store>
            <name>broken</name>
            <persistence>read-only</persistence>
            <routing-strategy>consistent-routing</routing-strategy>
            <replication-factor>1</replication-factor>
            <key-serializer><type>identity</type><compression><type>none</type></compression></key-serializer>
            <value-serializer><type>identity</type><compression><type>none</type></compression></value-serializer>
          </store>
        </stores>
    "#
    .to_string();

    let server = tokio::spawn(serve_one_node(listener, cluster_xml, stores_xml));

    let cluster = Cluster::new("127.0.0.1", addr.port(), ClusterClientConfig::default());
    cluster.connect().await.unwrap();

    (cluster, server)
}

#[tokio::test]
async fn bootstraps_and_fetches_a_value() {
    let (cluster, server) = bootstrapped_cluster().await;

    let store = cluster.store("users");
    let value = store.get(&Value::Bytes(b"alice".to_vec())).await.unwrap();
    assert_eq!(value, Value::Bytes(b"alice-value".to_vec()));

    server.abort();
}

#[tokio::test]
async fn get_unrouted_reaches_the_random_fallback_path() {
    let (cluster, server) = bootstrapped_cluster().await;

    // No partition ring consulted here -- just the cluster's connection
    // pool sampled directly (§4.F "Random selection").
    let store = cluster.store("users");
    let value = store.get_unrouted(&Value::Bytes(b"alice".to_vec())).await.unwrap();
    assert_eq!(value, Value::Bytes(b"alice-value".to_vec()));

    server.abort();
}

#[tokio::test]
async fn missing_key_surfaces_as_key_not_found() {
    let (cluster, server) = bootstrapped_cluster().await;

    let store = cluster.store("users");
    let err = store.get(&Value::Bytes(b"nobody".to_vec())).await.unwrap_err();
    assert!(matches!(err, Error::Client(ClientError::KeyNotFound)));

    server.abort();
}

#[tokio::test]
async fn unknown_store_is_a_client_error() {
    let (cluster, server) = bootstrapped_cluster().await;

    let store = cluster.store("does-not-exist");
    let err = store.get(&Value::Bytes(b"x".to_vec())).await.unwrap_err();
    assert!(matches!(err, Error::Client(ClientError::UnknownStore(_))));

    server.abort();
}

#[tokio::test]
async fn server_side_fault_surfaces_as_server_error_when_single_replica() {
    let (cluster, server) = bootstrapped_cluster().await;

    let store = cluster.store("broken");
    let err = store.get(&Value::Bytes(b"x".to_vec())).await.unwrap_err();
    assert!(matches!(err, Error::Server(pkv_client::ServerError::RemoteFault { code: 500, .. })));

    server.abort();
}

#[tokio::test]
async fn concurrent_gets_before_bootstrap_completes_all_resolve() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let cluster_xml = format!(
        "<cluster><name>test</name><server><id>0</id><host>127.0.0.1</host><socket-port>{}</socket-port><partitions>0</partitions></server></cluster>",
        addr.port()
    );
    let stores_xml = r#"
        <stores>
          <store>
            <name>users</name>
            <persistence>read-only</persistence>
            <routing-strategy>consistent-routing</routing-strategy>
            <replication-factor>1</replication-factor>
            <key-serializer><type>identity</type><compression><type>none</type></compression></key-serializer>
            <value-serializer><type>identity</type><compression><type>none</type></compression></value-serializer>
          </store>
        </stores>
    "#
    .to_string();

    let server = tokio::spawn(serve_one_node(listener, cluster_xml, stores_xml));

    let cluster = Cluster::new("127.0.0.1", addr.port(), ClusterClientConfig::default());
    let store = cluster.store("users");

    // Fire three `get`s before explicitly awaiting bootstrap: each
    // should park behind the same bootstrap attempt and then resolve
    // against the resulting topology (§8 bootstrap idempotence).
    let g0 = store.get(&Value::Bytes(b"alice".to_vec()));
    let g1 = store.get(&Value::Bytes(b"alice".to_vec()));
    let g2 = store.get(&Value::Bytes(b"alice".to_vec()));

    let (r0, r1, r2) = tokio::join!(g0, g1, g2);
    for r in [r0, r1, r2] {
        assert_eq!(r.unwrap(), Value::Bytes(b"alice-value".to_vec()));
    }

    server.abort();
}

// ABOUTME: Minimal libpod REST client over a Unix socket, using hyper.
// ABOUTME: Resource model: images -> image -> container-from-image -> start.

use crate::engine::traits::grace_secs;
use crate::types::{ContainerId, ImageId};
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::{Method, StatusCode};
use hyper_util::rt::TokioIo;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;
use tokio::net::UnixStream;

const API_PREFIX: &str = "/v4.0.0/libpod";

/// Errors from the libpod API.
#[derive(Debug, thiserror::Error)]
pub enum PodmanError {
    #[error("cannot reach {socket}: {reason}")]
    Connect { socket: String, reason: String },

    #[error("image not found: {0}")]
    ImageNotFound(String),

    #[error("no such container: {0}")]
    ContainerNotFound(String),

    #[error("libpod returned {status}: {message}")]
    Status { status: u16, message: String },

    #[error("unexpected libpod response: {0}")]
    Decode(String),

    #[error("invalid publish argument: {0}")]
    InvalidPublish(String),

    #[error("invalid volume argument: {0}")]
    InvalidVolume(String),
}

/// Arguments for creating a container, in podman's command-line grammar.
///
/// `publish` entries use `[ip:]host:container[/protocol]` and `volume`
/// entries use `host:container[:options]`, as `podman run -p`/`-v` do.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CreateArgs {
    pub env: BTreeMap<String, String>,
    pub publish: Vec<String>,
    pub volume: Vec<String>,
    pub entrypoint: Option<Vec<String>>,
    pub command: Vec<String>,
}

/// Body of `POST /libpod/containers/create`.
#[derive(Debug, Serialize)]
struct SpecGenerator {
    image: String,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    env: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    command: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    entrypoint: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    portmappings: Vec<PortMapping>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    mounts: Vec<Mount>,
}

#[derive(Debug, PartialEq, Eq, Serialize)]
struct PortMapping {
    #[serde(skip_serializing_if = "Option::is_none")]
    host_ip: Option<String>,
    container_port: u16,
    host_port: u16,
    protocol: String,
}

#[derive(Debug, PartialEq, Eq, Serialize)]
struct Mount {
    destination: String,
    source: String,
    #[serde(rename = "type")]
    kind: String,
    options: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct IdResponse<I> {
    #[serde(rename = "Id")]
    id: I,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    message: String,
}

fn parse_port(value: &str, token: &str) -> Result<u16, PodmanError> {
    value
        .parse::<u16>()
        .map_err(|_| PodmanError::InvalidPublish(format!("{} (bad port {:?})", token, value)))
}

fn parse_publish(token: &str) -> Result<PortMapping, PodmanError> {
    let (ports, protocol) = token.split_once('/').unwrap_or((token, "tcp"));
    let parts: Vec<&str> = ports.split(':').collect();
    let (host_ip, host, container) = match parts.as_slice() {
        [host, container] => (None, *host, *container),
        [ip, host, container] => (Some((*ip).to_string()), *host, *container),
        _ => return Err(PodmanError::InvalidPublish(token.to_string())),
    };

    // An empty host port asks podman to pick one.
    let host_port = if host.is_empty() {
        0
    } else {
        parse_port(host, token)?
    };

    Ok(PortMapping {
        host_ip: host_ip.filter(|ip| !ip.is_empty()),
        container_port: parse_port(container, token)?,
        host_port,
        protocol: protocol.to_string(),
    })
}

fn parse_volume(token: &str) -> Result<Mount, PodmanError> {
    let mut parts = token.splitn(3, ':');
    let source = parts.next().unwrap_or_default();
    let destination = parts.next().unwrap_or_default();
    if source.is_empty() || destination.is_empty() {
        return Err(PodmanError::InvalidVolume(token.to_string()));
    }
    let options = parts
        .next()
        .map(|opts| {
            opts.split(',')
                .filter(|o| !o.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    Ok(Mount {
        destination: destination.to_string(),
        source: source.to_string(),
        kind: "bind".to_string(),
        options,
    })
}

impl CreateArgs {
    fn spec_generator(&self, image: &str) -> Result<SpecGenerator, PodmanError> {
        Ok(SpecGenerator {
            image: image.to_string(),
            env: self.env.clone(),
            command: self.command.clone(),
            entrypoint: self.entrypoint.clone(),
            portmappings: self
                .publish
                .iter()
                .map(|p| parse_publish(p))
                .collect::<Result<_, _>>()?,
            mounts: self
                .volume
                .iter()
                .map(|v| parse_volume(v))
                .collect::<Result<_, _>>()?,
        })
    }
}

/// Split a multiplexed log body into its frames' payloads.
///
/// Each frame is an 8-byte header (stream byte, three zero bytes, big-endian
/// u32 length) followed by the payload. A body that does not start with a
/// frame header (a container with a TTY) is returned as one chunk.
pub(crate) fn split_frames(body: Bytes) -> Vec<Bytes> {
    let mut chunks = Vec::new();
    let mut rest = body;
    while rest.len() >= 8 && rest[0] <= 2 && rest[1..4] == [0u8, 0, 0] {
        let len = u32::from_be_bytes([rest[4], rest[5], rest[6], rest[7]]) as usize;
        if rest.len() < 8 + len {
            break;
        }
        let frame = rest.split_to(8 + len);
        chunks.push(frame.slice(8..));
    }
    if !rest.is_empty() {
        chunks.push(rest);
    }
    chunks
}

struct Response {
    status: StatusCode,
    body: Bytes,
}

impl Response {
    fn message(&self) -> String {
        serde_json::from_slice::<ErrorResponse>(&self.body)
            .map(|e| e.message)
            .unwrap_or_else(|_| String::from_utf8_lossy(&self.body).trim().to_string())
    }

    fn into_status_error(self) -> PodmanError {
        PodmanError::Status {
            status: self.status.as_u16(),
            message: self.message(),
        }
    }
}

/// Client for one libpod socket. Opens a fresh HTTP/1 connection per request.
#[derive(Debug, Clone)]
pub struct PodmanClient {
    socket: PathBuf,
}

impl PodmanClient {
    pub fn new(socket: impl Into<PathBuf>) -> Self {
        Self {
            socket: socket.into(),
        }
    }

    pub fn images(&self) -> Images<'_> {
        Images { client: self }
    }

    /// A container by id. Nothing is checked until an operation runs.
    pub fn container(&self, id: ContainerId) -> Container<'_> {
        Container { client: self, id }
    }

    pub async fn ping(&self) -> Result<(), PodmanError> {
        let resp = self.send(Method::GET, "/_ping", None).await?;
        if !resp.status.is_success() {
            return Err(resp.into_status_error());
        }
        Ok(())
    }

    fn connect_error(&self, reason: impl std::fmt::Display) -> PodmanError {
        PodmanError::Connect {
            socket: self.socket.display().to_string(),
            reason: reason.to_string(),
        }
    }

    async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<Vec<u8>>,
    ) -> Result<Response, PodmanError> {
        self.send(method, &format!("{}{}", API_PREFIX, path), body)
            .await
    }

    async fn send(
        &self,
        method: Method,
        uri: &str,
        body: Option<Vec<u8>>,
    ) -> Result<Response, PodmanError> {
        let stream = UnixStream::connect(&self.socket)
            .await
            .map_err(|e| self.connect_error(e))?;
        let io = TokioIo::new(stream);

        let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
            .await
            .map_err(|e| self.connect_error(format!("HTTP handshake failed: {}", e)))?;

        tokio::spawn(async move {
            if let Err(e) = conn.await {
                tracing::warn!("libpod connection error: {}", e);
            }
        });

        let mut builder = hyper::Request::builder()
            .method(method.clone())
            .uri(uri)
            .header("Host", "localhost");
        if body.is_some() {
            builder = builder.header("Content-Type", "application/json");
        }
        let req = builder
            .body(Full::new(Bytes::from(body.unwrap_or_default())))
            .map_err(|e| PodmanError::Decode(format!("failed to build request: {}", e)))?;

        tracing::debug!(%method, %uri, "libpod request");
        let resp = sender
            .send_request(req)
            .await
            .map_err(|e| self.connect_error(format!("request failed: {}", e)))?;

        let status = resp.status();
        let body = resp
            .into_body()
            .collect()
            .await
            .map_err(|e| self.connect_error(format!("failed to read response: {}", e)))?
            .to_bytes();

        Ok(Response { status, body })
    }
}

/// The image store.
pub struct Images<'a> {
    client: &'a PodmanClient,
}

impl<'a> Images<'a> {
    /// Look up a local image. Fails with [`PodmanError::ImageNotFound`] when
    /// the reference is not present locally; this does not pull.
    pub async fn get(&self, reference: &str) -> Result<Image<'a>, PodmanError> {
        let resp = self
            .client
            .request(Method::GET, &format!("/images/{}/json", reference), None)
            .await?;

        match resp.status {
            StatusCode::OK => {
                let inspect: IdResponse<ImageId> = serde_json::from_slice(&resp.body)
                    .map_err(|e| PodmanError::Decode(e.to_string()))?;
                Ok(Image {
                    client: self.client,
                    id: inspect.id,
                })
            }
            StatusCode::NOT_FOUND => Err(PodmanError::ImageNotFound(reference.to_string())),
            _ => Err(resp.into_status_error()),
        }
    }

    /// Pull `reference` from its registry.
    pub async fn pull(&self, reference: &str) -> Result<(), PodmanError> {
        let path = format!(
            "/images/pull?reference={}",
            urlencoding::encode(reference)
        );
        let resp = self.client.request(Method::POST, &path, None).await?;
        if !resp.status.is_success() {
            return Err(resp.into_status_error());
        }

        // The body is a stream of JSON progress lines; a failed pull still
        // answers 200 and reports the failure in an `error` field.
        for line in resp.body.split(|b| *b == b'\n') {
            let Ok(progress) = serde_json::from_slice::<serde_json::Value>(line) else {
                continue;
            };
            if let Some(error) = progress.get("error").and_then(|e| e.as_str())
                && !error.is_empty()
            {
                return Err(PodmanError::Status {
                    status: resp.status.as_u16(),
                    message: error.to_string(),
                });
            }
        }
        Ok(())
    }
}

/// A local image, found through [`Images::get`].
pub struct Image<'a> {
    client: &'a PodmanClient,
    id: ImageId,
}

impl<'a> Image<'a> {
    pub fn id(&self) -> &ImageId {
        &self.id
    }

    /// Create (but do not start) a container from this image.
    pub async fn create_container(
        &self,
        args: &CreateArgs,
    ) -> Result<Container<'a>, PodmanError> {
        let spec = args.spec_generator(self.id.as_str())?;
        let body = serde_json::to_vec(&spec).map_err(|e| PodmanError::Decode(e.to_string()))?;

        let resp = self
            .client
            .request(Method::POST, "/containers/create", Some(body))
            .await?;
        if resp.status != StatusCode::CREATED {
            return Err(resp.into_status_error());
        }

        let created: IdResponse<ContainerId> =
            serde_json::from_slice(&resp.body).map_err(|e| PodmanError::Decode(e.to_string()))?;
        Ok(Container {
            client: self.client,
            id: created.id,
        })
    }
}

/// A container known to libpod.
pub struct Container<'a> {
    client: &'a PodmanClient,
    id: ContainerId,
}

impl<'a> Container<'a> {
    pub fn id(&self) -> &ContainerId {
        &self.id
    }

    pub fn into_id(self) -> ContainerId {
        self.id
    }

    /// Map a response for a container endpoint: 404 is a missing container,
    /// 304 (already in the requested state) is success.
    fn check(&self, resp: Response) -> Result<Response, PodmanError> {
        match resp.status {
            StatusCode::NOT_FOUND => Err(PodmanError::ContainerNotFound(format!(
                "{}: {}",
                self.id.short(),
                resp.message()
            ))),
            StatusCode::NOT_MODIFIED => Ok(resp),
            s if s.is_success() => Ok(resp),
            _ => Err(resp.into_status_error()),
        }
    }

    pub async fn start(&self) -> Result<(), PodmanError> {
        let path = format!("/containers/{}/start", self.id);
        let resp = self.client.request(Method::POST, &path, None).await?;
        self.check(resp).map(|_| ())
    }

    pub async fn stop(&self, timeout: Duration) -> Result<(), PodmanError> {
        let path = format!(
            "/containers/{}/stop?timeout={}",
            self.id,
            grace_secs(timeout)
        );
        let resp = self.client.request(Method::POST, &path, None).await?;
        self.check(resp).map(|_| ())
    }

    pub async fn remove(&self, force: bool) -> Result<(), PodmanError> {
        let path = format!("/containers/{}?force={}", self.id, force);
        let resp = self.client.request(Method::DELETE, &path, None).await?;
        self.check(resp).map(|_| ())
    }

    /// Block until the container's main process exits; returns its exit code.
    pub async fn wait(&self) -> Result<i64, PodmanError> {
        let path = format!("/containers/{}/wait", self.id);
        let resp = self.check(self.client.request(Method::POST, &path, None).await?)?;
        let text = String::from_utf8_lossy(&resp.body);
        text.trim()
            .parse::<i64>()
            .map_err(|_| PodmanError::Decode(format!("wait returned {:?}", text)))
    }

    /// Log output so far, one chunk per frame the engine sent.
    pub async fn logs(&self) -> Result<Vec<Bytes>, PodmanError> {
        let path = format!("/containers/{}/logs?stdout=true&stderr=true", self.id);
        let resp = self.check(self.client.request(Method::GET, &path, None).await?)?;
        Ok(split_frames(resp.body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(stream: u8, payload: &[u8]) -> Vec<u8> {
        let mut out = vec![stream, 0, 0, 0];
        out.extend_from_slice(&(payload.len() as u32).to_be_bytes());
        out.extend_from_slice(payload);
        out
    }

    #[test]
    fn publish_token_forms() {
        assert_eq!(
            parse_publish("8080:80").unwrap(),
            PortMapping {
                host_ip: None,
                container_port: 80,
                host_port: 8080,
                protocol: "tcp".to_string(),
            }
        );
        assert_eq!(
            parse_publish("127.0.0.1:5353:53/udp").unwrap(),
            PortMapping {
                host_ip: Some("127.0.0.1".to_string()),
                container_port: 53,
                host_port: 5353,
                protocol: "udp".to_string(),
            }
        );
        assert_eq!(parse_publish(":80").unwrap().host_port, 0);
    }

    #[test]
    fn bad_publish_tokens_are_rejected() {
        assert!(matches!(
            parse_publish("80"),
            Err(PodmanError::InvalidPublish(_))
        ));
        assert!(matches!(
            parse_publish("http:80"),
            Err(PodmanError::InvalidPublish(_))
        ));
        assert!(matches!(
            parse_publish("1:2:3:4"),
            Err(PodmanError::InvalidPublish(_))
        ));
    }

    #[test]
    fn volume_token_options() {
        let mount = parse_volume("/host/a:/container/a:ro,Z").unwrap();
        assert_eq!(mount.source, "/host/a");
        assert_eq!(mount.destination, "/container/a");
        assert_eq!(mount.kind, "bind");
        assert_eq!(mount.options, vec!["ro".to_string(), "Z".to_string()]);

        assert!(parse_volume("/host/a:/container/a").unwrap().options.is_empty());
        assert!(matches!(
            parse_volume("/host/only"),
            Err(PodmanError::InvalidVolume(_))
        ));
    }

    #[test]
    fn spec_generator_json_shape() {
        let args = CreateArgs {
            env: BTreeMap::from([("A".to_string(), "1".to_string())]),
            publish: vec!["8080:80".to_string()],
            volume: vec!["/h:/c:Z".to_string()],
            entrypoint: None,
            command: vec!["sleep".to_string(), "5".to_string()],
        };
        let json = serde_json::to_value(args.spec_generator("abc123").unwrap()).unwrap();
        assert_eq!(json["image"], "abc123");
        assert_eq!(json["env"]["A"], "1");
        assert_eq!(json["command"][1], "5");
        assert_eq!(json["portmappings"][0]["container_port"], 80);
        assert_eq!(json["portmappings"][0]["host_port"], 8080);
        assert_eq!(json["mounts"][0]["type"], "bind");
        assert_eq!(json["mounts"][0]["options"][0], "Z");
        assert!(json.get("entrypoint").is_none());
    }

    #[test]
    fn empty_args_serialize_only_the_image() {
        let json = serde_json::to_value(CreateArgs::default().spec_generator("busybox").unwrap())
            .unwrap();
        assert_eq!(json, serde_json::json!({ "image": "busybox" }));
    }

    #[test]
    fn frames_are_split_without_separators() {
        let mut body = frame(1, b"hello ");
        body.extend(frame(2, b"world\n"));
        body.extend(frame(1, b""));
        let chunks = split_frames(Bytes::from(body));
        assert_eq!(chunks.len(), 3);
        let joined: Vec<u8> = chunks.iter().flat_map(|c| c.iter().copied()).collect();
        assert_eq!(joined, b"hello world\n");
    }

    #[test]
    fn raw_tty_output_is_one_chunk() {
        let chunks = split_frames(Bytes::from_static(b"plain tty output\n"));
        assert_eq!(chunks, vec![Bytes::from_static(b"plain tty output\n")]);
    }

    #[test]
    fn empty_body_has_no_chunks() {
        assert!(split_frames(Bytes::new()).is_empty());
    }
}

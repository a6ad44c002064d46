//! Line-oriented command console.
//!
//! One command per line, read from stdin or from clients of a Unix socket.
//! Every command yields one JSON response: `{"ok":true,"result":…}` or
//! `{"ok":false,"error":{"kind":…,"message":…}}`.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::Context;
use serde::Serialize;
use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tracing::{debug, info, warn};

use crate::error::TopologyError;
use crate::export::TopologyDocument;
use crate::lifecycle::ControlPlane;
use crate::model::{
    Controller, Host, HostPatch, Link, LinkOptions, Nat, Node, Position, Router, Switch,
};

const HELP: &[&str] = &[
    "controller <id> [kind= ip= port= app= remote= color= label= x= y=]",
    "switch <id> [type= ports= controller= protocol= label= x= y=]",
    "host|router|nat <id> [ip= mac= label= x= y=]",
    "link <a> <b> [bw= delay= jitter= loss= queue= enabled=]",
    "update-link <a> <b> [opts]",
    "unlink <a> <b>",
    "delete <id>",
    "update-host <id> [ip= mac= label= x= y=]",
    "move <id> <x> <y>",
    "associate <switch> <controller>",
    "disassociate <switch> [controller]",
    "start | stop | reset | full-reset",
    "status | show | interfaces | export | script",
    "import <path> | save <path>",
];

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Node(Node),
    Link {
        a: String,
        b: String,
        options: LinkOptions,
    },
    UpdateLink {
        a: String,
        b: String,
        options: LinkOptions,
    },
    Unlink {
        a: String,
        b: String,
    },
    Delete(String),
    UpdateHost {
        id: String,
        patch: HostPatch,
    },
    Move {
        id: String,
        position: Position,
    },
    Associate {
        switch: String,
        controller: String,
    },
    Disassociate {
        switch: String,
        controller: Option<String>,
    },
    Start,
    Stop,
    Reset,
    FullReset,
    Status,
    Show,
    Interfaces,
    Export,
    Script,
    Import(PathBuf),
    Save(PathBuf),
    Help,
}

/// Why a line could not be turned into a [`Command`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// Wrong command name or argument count.
    Usage(String),
    /// Well-formed command with a bad value.
    Invalid(String),
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseError::Usage(msg) | ParseError::Invalid(msg) => f.write_str(msg),
        }
    }
}

fn usage(msg: &str) -> ParseError {
    ParseError::Usage(format!("usage: {msg}"))
}

fn parse_value<T>(key: &str, raw: &str) -> Result<T, ParseError>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    raw.parse()
        .map_err(|e| ParseError::Invalid(format!("invalid {key} '{raw}': {e}")))
}

fn parse_flag(key: &str, raw: &str) -> Result<bool, ParseError> {
    match raw {
        "on" | "true" | "yes" | "1" => Ok(true),
        "off" | "false" | "no" | "0" => Ok(false),
        other => Err(ParseError::Invalid(format!(
            "invalid {key} '{other}': use on or off"
        ))),
    }
}

fn optional(raw: &str) -> Option<String> {
    match raw {
        "" | "none" => None,
        s => Some(s.to_string()),
    }
}

/// Split `key=value` words. Keys may appear at most once.
fn pairs<'a>(words: &[&'a str]) -> Result<Vec<(&'a str, &'a str)>, ParseError> {
    let mut out: Vec<(&str, &str)> = Vec::with_capacity(words.len());
    for word in words {
        let Some((key, value)) = word.split_once('=') else {
            return Err(ParseError::Usage(format!(
                "expected key=value, got '{word}'"
            )));
        };
        if out.iter().any(|(k, _)| *k == key) {
            return Err(ParseError::Usage(format!("'{key}' given twice")));
        }
        out.push((key, value));
    }
    Ok(out)
}

fn unknown_key(key: &str, command: &str) -> ParseError {
    ParseError::Usage(format!("unknown option '{key}' for {command}"))
}

/// Fold an `x=`/`y=` pair into `position`. Returns false for other keys.
fn position_key(position: &mut Position, key: &str, raw: &str) -> Result<bool, ParseError> {
    match key {
        "x" => position.x = parse_value(key, raw)?,
        "y" => position.y = parse_value(key, raw)?,
        _ => return Ok(false),
    }
    Ok(true)
}

fn parse_controller(id: &str, opts: &[(&str, &str)]) -> Result<Node, ParseError> {
    let mut c = Controller::new(id);
    for &(key, raw) in opts {
        if position_key(&mut c.position, key, raw)? {
            continue;
        }
        match key {
            "kind" => c.kind = parse_value(key, raw)?,
            "ip" => c.ip = parse_value(key, raw)?,
            "port" => c.port = parse_value(key, raw)?,
            "app" => c.app = optional(raw),
            "remote" => c.remote = parse_flag(key, raw)?,
            "color" => c.color = optional(raw),
            "label" => c.label = raw.to_string(),
            other => return Err(unknown_key(other, "controller")),
        }
    }
    Ok(Node::from(c))
}

fn parse_switch(id: &str, opts: &[(&str, &str)]) -> Result<Node, ParseError> {
    let mut s = Switch::new(id);
    for &(key, raw) in opts {
        if position_key(&mut s.position, key, raw)? {
            continue;
        }
        match key {
            "type" => s.switch_type = parse_value(key, raw)?,
            "ports" => s.ports = parse_value(key, raw)?,
            "controller" => s.controller_id = optional(raw),
            "protocol" => s.protocol = optional(raw),
            "label" => s.label = raw.to_string(),
            other => return Err(unknown_key(other, "switch")),
        }
    }
    Ok(Node::from(s))
}

/// Fields shared by hosts, routers and nats.
#[derive(Default)]
struct Addressed {
    label: String,
    position: Position,
    ip: Option<ipnet::IpNet>,
    mac: Option<String>,
}

fn parse_addressed(command: &str, opts: &[(&str, &str)]) -> Result<Addressed, ParseError> {
    let mut a = Addressed::default();
    for &(key, raw) in opts {
        if position_key(&mut a.position, key, raw)? {
            continue;
        }
        match key {
            "ip" => a.ip = Some(parse_value(key, raw)?),
            "mac" => a.mac = optional(raw),
            "label" => a.label = raw.to_string(),
            other => return Err(unknown_key(other, command)),
        }
    }
    Ok(a)
}

fn parse_host_like(command: &str, id: &str, opts: &[(&str, &str)]) -> Result<Node, ParseError> {
    let Addressed {
        label,
        position,
        ip,
        mac,
    } = parse_addressed(command, opts)?;
    let node = match command {
        "host" => Node::from(Host {
            label,
            position,
            ip,
            mac,
            ..Host::new(id)
        }),
        "router" => Node::from(Router {
            label,
            position,
            ip,
            mac,
            ..Router::new(id)
        }),
        _ => Node::from(Nat {
            label,
            position,
            ip,
            mac,
            ..Nat::new(id)
        }),
    };
    Ok(node)
}

/// Shaping options. Giving any shaping value enables the link unless
/// `enabled=off` says otherwise.
fn parse_link_options(opts: &[(&str, &str)]) -> Result<LinkOptions, ParseError> {
    let mut options = LinkOptions::default();
    let mut enabled = None;
    for &(key, raw) in opts {
        match key {
            "bw" | "bandwidth" => options.bandwidth = Some(parse_value(key, raw)?),
            "delay" => options.delay = Some(parse_value(key, raw)?),
            "jitter" => options.jitter = Some(parse_value(key, raw)?),
            "loss" => options.loss = Some(parse_value(key, raw)?),
            "queue" | "max_queue_size" => options.max_queue_size = Some(parse_value(key, raw)?),
            "enabled" => enabled = Some(parse_flag(key, raw)?),
            other => return Err(unknown_key(other, "link")),
        }
    }
    options.enabled = enabled.unwrap_or(!opts.is_empty());
    Ok(options)
}

fn parse_host_patch(opts: &[(&str, &str)]) -> Result<HostPatch, ParseError> {
    let mut patch = HostPatch::default();
    let (mut x, mut y) = (None, None);
    for &(key, raw) in opts {
        match key {
            "ip" => patch.ip = Some(parse_value(key, raw)?),
            "mac" => patch.mac = Some(raw.to_string()),
            "label" => patch.label = Some(raw.to_string()),
            "x" => x = Some(parse_value::<f64>(key, raw)?),
            "y" => y = Some(parse_value::<f64>(key, raw)?),
            other => return Err(unknown_key(other, "update-host")),
        }
    }
    patch.position = match (x, y) {
        (Some(x), Some(y)) => Some(Position::new(x, y)),
        (None, None) => None,
        _ => return Err(usage("update-host needs both x= and y= to move")),
    };
    Ok(patch)
}

/// Parse one console line. Blank lines and `#` comments yield `None`.
pub fn parse_command(line: &str) -> Result<Option<Command>, ParseError> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }
    let parts: Vec<&str> = line.split_whitespace().collect();
    let (name, args) = (parts[0], &parts[1..]);

    let bare = |cmd: Command| {
        if args.is_empty() {
            Ok(cmd)
        } else {
            Err(usage(name))
        }
    };

    let cmd = match name {
        "controller" | "switch" | "host" | "router" | "nat" => {
            let Some((id, rest)) = args.split_first() else {
                return Err(usage(&format!("{name} <id> [key=value...]")));
            };
            let opts = pairs(rest)?;
            let node = match name {
                "controller" => parse_controller(id, &opts)?,
                "switch" => parse_switch(id, &opts)?,
                _ => parse_host_like(name, id, &opts)?,
            };
            Command::Node(node)
        }
        "link" | "update-link" => {
            if args.len() < 2 {
                return Err(usage(&format!("{name} <a> <b> [opts]")));
            }
            let options = parse_link_options(&pairs(&args[2..])?)?;
            let (a, b) = (args[0].to_string(), args[1].to_string());
            if name == "link" {
                Command::Link { a, b, options }
            } else {
                Command::UpdateLink { a, b, options }
            }
        }
        "unlink" => match args {
            [a, b] => Command::Unlink {
                a: a.to_string(),
                b: b.to_string(),
            },
            _ => return Err(usage("unlink <a> <b>")),
        },
        "delete" => match args {
            [id] => Command::Delete(id.to_string()),
            _ => return Err(usage("delete <id>")),
        },
        "update-host" => {
            let Some((id, rest)) = args.split_first() else {
                return Err(usage("update-host <id> [key=value...]"));
            };
            Command::UpdateHost {
                id: id.to_string(),
                patch: parse_host_patch(&pairs(rest)?)?,
            }
        }
        "move" => match args {
            [id, x, y] => Command::Move {
                id: id.to_string(),
                position: Position::new(parse_value("x", x)?, parse_value("y", y)?),
            },
            _ => return Err(usage("move <id> <x> <y>")),
        },
        "associate" => match args {
            [switch, controller] => Command::Associate {
                switch: switch.to_string(),
                controller: controller.to_string(),
            },
            _ => return Err(usage("associate <switch> <controller>")),
        },
        "disassociate" => match args {
            [switch] => Command::Disassociate {
                switch: switch.to_string(),
                controller: None,
            },
            [switch, controller] => Command::Disassociate {
                switch: switch.to_string(),
                controller: Some(controller.to_string()),
            },
            _ => return Err(usage("disassociate <switch> [controller]")),
        },
        "import" | "save" => match args {
            [path] if name == "import" => Command::Import(PathBuf::from(path)),
            [path] => Command::Save(PathBuf::from(path)),
            _ => return Err(usage(&format!("{name} <path>"))),
        },
        "start" => bare(Command::Start)?,
        "stop" => bare(Command::Stop)?,
        "reset" => bare(Command::Reset)?,
        "full-reset" => bare(Command::FullReset)?,
        "status" => bare(Command::Status)?,
        "show" => bare(Command::Show)?,
        "interfaces" => bare(Command::Interfaces)?,
        "export" => bare(Command::Export)?,
        "script" => bare(Command::Script)?,
        "help" => bare(Command::Help)?,
        other => {
            return Err(ParseError::Usage(format!(
                "unknown command '{other}', try 'help'"
            )));
        }
    };
    Ok(Some(cmd))
}

// ---------------------------------------------------------------------------
// Responses
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorBody {
    pub kind: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Response {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

impl Response {
    pub fn ok(result: Value) -> Self {
        Self {
            ok: true,
            result: Some(result),
            error: None,
        }
    }

    pub fn error(kind: &str, message: impl Into<String>) -> Self {
        Self {
            ok: false,
            result: None,
            error: Some(ErrorBody {
                kind: kind.to_string(),
                message: message.into(),
            }),
        }
    }

    /// Error kind, if this is a failure.
    pub fn error_kind(&self) -> Option<&str> {
        self.error.as_ref().map(|e| e.kind.as_str())
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| r#"{"ok":false}"#.to_string())
    }
}

impl From<TopologyError> for Response {
    fn from(err: TopologyError) -> Self {
        Response::error(&err.kind().to_string(), err.to_string())
    }
}

impl From<ParseError> for Response {
    fn from(err: ParseError) -> Self {
        match err {
            ParseError::Usage(msg) => Response::error("usage", msg),
            ParseError::Invalid(msg) => Response::error("validation", msg),
        }
    }
}

fn to_value<T: Serialize>(value: &T) -> Value {
    serde_json::to_value(value).unwrap_or(Value::Null)
}

fn link_json(link: &Link) -> Value {
    let (from, to) = link.key.endpoints();
    json!({ "from": from, "to": to, "options": to_value(&link.options) })
}

fn reply<T>(res: crate::error::Result<T>, render: impl FnOnce(T) -> Value) -> Response {
    match res {
        Ok(value) => Response::ok(render(value)),
        Err(err) => err.into(),
    }
}

/// Run one command against the control plane.
pub async fn execute(plane: &ControlPlane, cmd: Command) -> Response {
    match cmd {
        Command::Node(node) => reply(plane.create_node(node).await, |n| to_value(&n)),
        Command::Link { a, b, options } => {
            reply(plane.create_link(&a, &b, options).await, |l| link_json(&l))
        }
        Command::UpdateLink { a, b, options } => {
            reply(plane.update_link(&a, &b, options).await, |l| link_json(&l))
        }
        Command::Unlink { a, b } => reply(plane.delete_link(&a, &b).await, |l| link_json(&l)),
        Command::Delete(id) => reply(plane.delete_node(&id).await, |removal| {
            json!({
                "removed": to_value(&removal.node),
                "links": removal.links.iter().map(link_json).collect::<Vec<_>>(),
                "disassociated": removal.disassociated,
            })
        }),
        Command::UpdateHost { id, patch } => {
            reply(plane.update_host(&id, patch).await, |n| to_value(&n))
        }
        Command::Move { id, position } => {
            reply(plane.move_node(&id, position).await, |n| to_value(&n))
        }
        Command::Associate { switch, controller } => {
            reply(plane.associate(&switch, &controller).await, |s| to_value(&s))
        }
        Command::Disassociate { switch, controller } => reply(
            plane.disassociate(&switch, controller.as_deref()).await,
            |s| to_value(&s),
        ),
        Command::Start => reply(plane.start().await, |()| to_value(&plane.status())),
        Command::Stop => reply(plane.stop().await, |()| to_value(&plane.status())),
        Command::Reset => reply(plane.reset().await, |()| to_value(&plane.status())),
        Command::FullReset => reply(plane.full_reset().await, |()| to_value(&plane.status())),
        Command::Status => Response::ok(to_value(&plane.status())),
        Command::Show => {
            let store = plane.list_topology();
            let nodes: Vec<Value> = store
                .nodes()
                .iter()
                .map(|n| json!({ "id": n.id(), "kind": n.kind() }))
                .collect();
            let links: Vec<String> = store.links().iter().map(|l| l.key.to_string()).collect();
            Response::ok(json!({ "nodes": nodes, "links": links }))
        }
        Command::Interfaces => Response::ok(to_value(&plane.list_interfaces())),
        Command::Export => Response::ok(to_value(&plane.export_topology())),
        Command::Script => reply(plane.export_script(), Value::String),
        Command::Import(path) => match TopologyDocument::load(&path) {
            Ok(doc) => reply(plane.import_topology(doc).await, |(nodes, links)| {
                json!({ "nodes": nodes, "links": links })
            }),
            Err(err) => Response::error("validation", format!("{err:#}")),
        },
        Command::Save(path) => match plane.export_topology().save(&path) {
            Ok(()) => Response::ok(json!({ "path": path })),
            Err(err) => Response::error("engine", format!("{err:#}")),
        },
        Command::Help => Response::ok(to_value(&HELP)),
    }
}

/// Parse and run one line. Blank lines produce no response.
pub async fn handle_line(plane: &ControlPlane, line: &str) -> Option<Response> {
    let resp = match parse_command(line) {
        Ok(None) => return None,
        Ok(Some(cmd)) => execute(plane, cmd).await,
        Err(err) => err.into(),
    };
    match resp.error.as_ref() {
        None => debug!(command = line.trim(), "ok"),
        Some(e) => warn!(command = line.trim(), kind = %e.kind, "{}", e.message),
    }
    Some(resp)
}

// ---------------------------------------------------------------------------
// Listeners
// ---------------------------------------------------------------------------

/// Serve commands until the input closes: from the Unix socket at
/// `socket_path` when given, otherwise from stdin. Fails when the console
/// cannot be opened or read.
pub async fn run_console(plane: ControlPlane, socket_path: Option<&Path>) -> anyhow::Result<()> {
    match socket_path {
        Some(path) => unix_socket_loop(plane, path).await,
        None => stdin_loop(plane).await,
    }
}

async fn stdin_loop(plane: ControlPlane) -> anyhow::Result<()> {
    info!("reading commands from stdin, 'help' lists them");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if let Some(resp) = handle_line(&plane, &line).await {
                    println!("{}", resp.to_json());
                }
            }
            Ok(None) => {
                debug!("stdin closed");
                return Ok(());
            }
            Err(e) => return Err(e).context("read commands from stdin"),
        }
    }
}

async fn unix_socket_loop(plane: ControlPlane, socket_path: &Path) -> anyhow::Result<()> {
    // a leftover socket file from an earlier run blocks bind
    let _ = std::fs::remove_file(socket_path);

    let listener = UnixListener::bind(socket_path)
        .with_context(|| format!("bind control socket {}", socket_path.display()))?;
    info!("unix socket listening at: {}", socket_path.display());

    loop {
        match listener.accept().await {
            Ok((stream, _)) => {
                let plane = plane.clone();
                tokio::spawn(async move {
                    if let Err(e) = handle_unix_client(&plane, stream).await {
                        debug!("unix client closed: {}", e);
                    }
                });
            }
            Err(e) => {
                debug!("unix socket accept error: {}", e);
            }
        }
    }
}

async fn handle_unix_client(plane: &ControlPlane, stream: UnixStream) -> std::io::Result<()> {
    let (read, mut write) = stream.into_split();
    let mut lines = BufReader::new(read).lines();
    while let Some(line) = lines.next_line().await? {
        if let Some(resp) = handle_line(plane, &line).await {
            let mut out = resp.to_json();
            out.push('\n');
            write.write_all(out.as_bytes()).await?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ControllerKind, SwitchType};

    fn parse(line: &str) -> Command {
        parse_command(line).unwrap().unwrap()
    }

    #[test]
    fn test_blank_and_comment_lines() {
        assert_eq!(parse_command("   "), Ok(None));
        assert_eq!(parse_command("# a comment"), Ok(None));
    }

    #[test]
    fn test_parse_controller() {
        let Command::Node(Node::Controller(c)) =
            parse("controller c0 kind=ryu port=6633 app=simple_switch x=10 y=20")
        else {
            panic!("expected a controller");
        };
        assert_eq!(c.id, "c0");
        assert_eq!(c.kind, ControllerKind::Ryu);
        assert_eq!(c.port, 6633);
        assert_eq!(c.app.as_deref(), Some("simple_switch"));
        assert_eq!(c.position, Position::new(10.0, 20.0));
    }

    #[test]
    fn test_parse_switch_and_host() {
        let Command::Node(Node::Switch(s)) = parse("switch s1 type=user controller=c0") else {
            panic!("expected a switch");
        };
        assert_eq!(s.switch_type, SwitchType::User);
        assert_eq!(s.controller_id.as_deref(), Some("c0"));

        let Command::Node(Node::Host(h)) = parse("host h1 ip=10.0.0.1/24 mac=00:00:00:00:00:01")
        else {
            panic!("expected a host");
        };
        assert_eq!(h.ip, Some("10.0.0.1/24".parse().unwrap()));
        assert_eq!(h.mac.as_deref(), Some("00:00:00:00:00:01"));

        assert!(matches!(parse("nat nat0"), Command::Node(Node::Nat(_))));
        assert!(matches!(parse("router r1"), Command::Node(Node::Router(_))));
    }

    #[test]
    fn test_parse_link_options() {
        let Command::Link { a, b, options } = parse("link h1 s1 bw=10 delay=5 loss=1.5") else {
            panic!("expected a link");
        };
        assert_eq!((a.as_str(), b.as_str()), ("h1", "s1"));
        assert_eq!(options.bandwidth, Some(10.0));
        assert_eq!(options.delay, Some(5));
        assert_eq!(options.loss, Some(1.5));
        assert!(options.enabled);

        let Command::Link { options, .. } = parse("link h1 s1") else {
            panic!("expected a link");
        };
        assert_eq!(options, LinkOptions::default());

        let Command::UpdateLink { options, .. } = parse("update-link h1 s1 delay=5 enabled=off")
        else {
            panic!("expected an update");
        };
        assert!(!options.enabled);
        assert_eq!(options.delay, Some(5));
    }

    #[test]
    fn test_parse_update_host_and_move() {
        let Command::UpdateHost { id, patch } = parse("update-host h1 ip=10.0.0.9/8 x=1 y=2") else {
            panic!("expected update-host");
        };
        assert_eq!(id, "h1");
        assert!(patch.touches_addressing());
        assert_eq!(patch.position, Some(Position::new(1.0, 2.0)));

        assert_eq!(
            parse("move s1 3.5 4"),
            Command::Move {
                id: "s1".into(),
                position: Position::new(3.5, 4.0)
            }
        );
    }

    #[test]
    fn test_parse_disassociate_forms() {
        assert_eq!(
            parse("disassociate s1"),
            Command::Disassociate {
                switch: "s1".into(),
                controller: None
            }
        );
        assert_eq!(
            parse("disassociate s1 c0"),
            Command::Disassociate {
                switch: "s1".into(),
                controller: Some("c0".into())
            }
        );
    }

    #[test]
    fn test_parse_lifecycle_and_paths() {
        assert_eq!(parse("start"), Command::Start);
        assert_eq!(parse("full-reset"), Command::FullReset);
        assert_eq!(parse("import /tmp/t.json"), Command::Import("/tmp/t.json".into()));
        assert_eq!(parse("save t.json"), Command::Save("t.json".into()));
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!(parse_command("frobnicate"), Err(ParseError::Usage(_))));
        assert!(matches!(parse_command("start now"), Err(ParseError::Usage(_))));
        assert!(matches!(parse_command("link h1"), Err(ParseError::Usage(_))));
        assert!(matches!(parse_command("host h1 ip"), Err(ParseError::Usage(_))));
        assert!(matches!(parse_command("host h1 ip=1 ip=2"), Err(ParseError::Usage(_))));
        assert!(matches!(parse_command("host h1 colour=red"), Err(ParseError::Usage(_))));
        assert!(matches!(parse_command("update-host h1 x=1"), Err(ParseError::Usage(_))));
        assert!(matches!(
            parse_command("host h1 ip=banana"),
            Err(ParseError::Invalid(_))
        ));
        assert!(matches!(
            parse_command("controller c0 kind=floodlight"),
            Err(ParseError::Invalid(_))
        ));
        assert!(matches!(
            parse_command("link h1 s1 enabled=maybe"),
            Err(ParseError::Invalid(_))
        ));
    }

    #[test]
    fn test_response_json() {
        let ok = Response::ok(json!({"nodes": 2}));
        assert_eq!(ok.to_json(), r#"{"ok":true,"result":{"nodes":2}}"#);

        let err: Response = TopologyError::NotFound("node 'h9'".into()).into();
        let value: Value = serde_json::from_str(&err.to_json()).unwrap();
        assert_eq!(value["ok"], false);
        assert_eq!(value["error"]["kind"], "not_found");
        assert!(value.get("result").is_none());

        let usage: Response = ParseError::Usage("usage: start".into()).into();
        assert_eq!(usage.error_kind(), Some("usage"));
    }
}

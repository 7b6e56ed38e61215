//! The command protocol (port 8001).
//!
//! A vaguely SMTP-esque line protocol: single-line requests, numeric
//! status responses, multi-line data responses terminated by a lone `.`
//! with dot-stuffing both ways. Before a successful USER command only
//! USER, HELP, QUIT and VERSION are accepted. Command errors never drop an
//! authenticated session.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

use zino_core::config::secrets::read_users;
use zino_core::events::{
    Event, EventData, EventKey, EventKind, EventState, FlapState, LogEntry, SubIndex,
};
use zino_core::flaps::PortIndex;
use zino_core::pm::{MatchType, PmType};

use super::auth;
use super::notify::NotifyChannel;
use super::server::ApiShared;
use crate::VERSION;

type Reader = BufReader<OwnedReadHalf>;
type Writer = OwnedWriteHalf;

const HELP_WRAP_COLUMNS: usize = 56;

/// Commands that work before authentication.
const OPEN_COMMANDS: [&str; 4] = ["HELP", "QUIT", "USER", "VERSION"];

/// Commands requiring authentication, for HELP output.
const AUTH_COMMANDS: [&str; 12] = [
    "ADDHIST", "CASEIDS", "CLEARFLAP", "COMMUNITY", "GETATTRS", "GETHIST", "GETLOG", "NTIE",
    "PM", "POLLINTF", "POLLRTR", "SETSTATE",
];

enum Flow {
    Continue,
    Quit,
}

struct CommandSession {
    shared: Arc<ApiShared>,
    challenge: String,
    user: Option<String>,
    auth_attempted: bool,
    channel: Option<Arc<NotifyChannel>>,
}

/// Serves one command connection to completion.
pub async fn serve_command_client(stream: TcpStream, shared: Arc<ApiShared>) -> std::io::Result<()> {
    let (read_half, write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);
    let mut writer = write_half;
    let mut session = CommandSession {
        shared,
        challenge: auth::generate_challenge(),
        user: None,
        auth_attempted: false,
        channel: None,
    };
    respond(&mut writer, 200, &format!("{} Hello, there", session.challenge)).await?;

    let mut buf = Vec::new();
    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf).await? == 0 {
            break;
        }
        let line = decode_line(&buf);
        if line.trim().is_empty() {
            continue;
        }
        match session.dispatch(&mut reader, &mut writer, &line).await? {
            Flow::Continue => {}
            Flow::Quit => break,
        }
    }

    if let Some(channel) = &session.channel {
        channel.close();
    }
    Ok(())
}

/// Decodes a received line as UTF-8, falling back to Latin-1.
fn decode_line(raw: &[u8]) -> String {
    let trimmed: &[u8] = raw
        .strip_suffix(b"\n")
        .map(|r| r.strip_suffix(b"\r").unwrap_or(r))
        .unwrap_or(raw);
    match std::str::from_utf8(trimmed) {
        Ok(s) => s.to_string(),
        Err(_) => trimmed.iter().map(|&b| b as char).collect(),
    }
}

async fn write_line(writer: &mut Writer, line: &str) -> std::io::Result<()> {
    writer.write_all(format!("{line}\r\n").as_bytes()).await
}

async fn respond(writer: &mut Writer, code: u16, text: &str) -> std::io::Result<()> {
    write_line(writer, &format!("{code} {text}")).await
}

async fn respond_ok(writer: &mut Writer) -> std::io::Result<()> {
    respond(writer, 200, "ok").await
}

async fn respond_error(writer: &mut Writer, text: &str) -> std::io::Result<()> {
    respond(writer, 500, text).await
}

/// Sends a `3xx` data response: header, dot-stuffed data lines, lone dot.
async fn respond_data(
    writer: &mut Writer,
    code: u16,
    header: &str,
    lines: &[String],
) -> std::io::Result<()> {
    respond(writer, code, header).await?;
    for line in lines {
        if line.starts_with('.') {
            write_line(writer, &format!(".{line}")).await?;
        } else {
            write_line(writer, line).await?;
        }
    }
    write_line(writer, ".").await
}

/// Reads `.`-terminated multi-line input, un-stuffing leading dots.
async fn read_multiline(reader: &mut Reader) -> std::io::Result<Vec<String>> {
    let mut lines = Vec::new();
    let mut buf = Vec::new();
    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf).await? == 0 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "connection closed during multi-line input",
            ));
        }
        let line = decode_line(&buf);
        if line == "." {
            return Ok(lines);
        }
        if let Some(stuffed) = line.strip_prefix('.') {
            lines.push(stuffed.to_string());
        } else {
            lines.push(line);
        }
    }
}

fn unix_ts(when: DateTime<Utc>) -> String {
    when.timestamp().to_string()
}

fn wrap_words(words: &str, width: usize) -> Vec<String> {
    let mut lines: Vec<String> = Vec::new();
    for word in words.split_whitespace() {
        match lines.last_mut() {
            Some(last) if last.len() + 1 + word.len() <= width => {
                last.push(' ');
                last.push_str(word);
            }
            _ => lines.push(word.to_string()),
        }
    }
    lines
}

/// Renders the "simple" event attributes with their legacy names.
fn legacy_attrs(event: &Event) -> Vec<String> {
    let mut attrs: Vec<(String, String)> = vec![
        ("id".into(), event.id.to_string()),
        ("type".into(), event.kind().to_string()),
        ("router".into(), event.router.clone()),
        ("state".into(), event.state.to_string()),
        ("opened".into(), unix_ts(event.opened)),
        ("updated".into(), unix_ts(event.updated)),
        ("priority".into(), event.priority.to_string()),
    ];
    let mut push_opt = |name: &str, value: Option<String>| {
        if let Some(value) = value {
            attrs.push((name.to_string(), value));
        }
    };
    push_opt("closed", event.closed.map(unix_ts));
    push_opt("polladdr", event.polladdr.map(|a| a.to_string()));
    push_opt("lastevent", event.lastevent.clone());
    push_opt("lasttrans", event.lasttrans.map(unix_ts));
    push_opt("flaps", event.flaps.map(|f| f.to_string()));
    push_opt("ac-down", event.ac_down.map(|ms| (ms / 1000).to_string()));
    push_opt("pm", event.pm.map(|id| id.to_string()));

    match &event.data {
        EventData::Reachability(data) => {
            push_opt("reachability", data.reachability.map(|r| r.to_string()));
        }
        EventData::Portstate(data) => {
            push_opt("port", data.port.clone());
            push_opt("ifindex", Some(data.ifindex.to_string()));
            push_opt("portstate", data.portstate.map(|s| s.to_string()));
            push_opt("descr", data.descr.clone());
            push_opt("flapstate", data.flapstate.map(|s| s.to_string()));
            push_opt("reason", data.reason.clone());
        }
        EventData::Bgp(data) => {
            push_opt("remote-addr", Some(data.remote_addr.to_string()));
            push_opt("remote-AS", data.remote_as.map(|v| v.to_string()));
            push_opt("peer-uptime", data.peer_uptime.map(|v| v.to_string()));
            push_opt("bgpOS", data.bgp_os.map(|v| v.to_string()));
            push_opt("bgpAS", data.bgp_as.map(|v| v.to_string()));
        }
        EventData::Bfd(data) => {
            push_opt("bfdDiscr", Some(data.bfd_discr.to_string()));
            push_opt("ifindex", data.ifindex.map(|v| v.to_string()));
            push_opt("bfdState", data.bfd_state.map(|v| v.to_string()));
            push_opt("bfdIx", data.bfd_ix.map(|v| v.to_string()));
            push_opt("bfdAddr", data.bfd_addr.map(|v| v.to_string()));
            push_opt("Neigh-rDNS", data.neigh_rdns.clone());
        }
        EventData::Alarm(data) => {
            push_opt("alarm-type", Some(data.alarm_type.to_string()));
            push_opt("alarm-count", Some(data.alarm_count.to_string()));
        }
    }

    attrs
        .into_iter()
        .map(|(name, value)| format!("{name}: {value}"))
        .collect()
}

fn dump_entries(entries: &[LogEntry]) -> Vec<String> {
    entries.iter().flat_map(LogEntry::dump_legacy).collect()
}

impl CommandSession {
    fn is_authenticated(&self) -> bool {
        self.user.is_some()
    }

    fn user(&self) -> &str {
        self.user.as_deref().unwrap_or("monitor")
    }

    async fn dispatch(
        &mut self,
        reader: &mut Reader,
        writer: &mut Writer,
        line: &str,
    ) -> std::io::Result<Flow> {
        let parts: Vec<&str> = line.split_whitespace().collect();
        let command = parts[0].to_ascii_uppercase();
        let args = &parts[1..];

        if !self.is_authenticated() && !OPEN_COMMANDS.contains(&command.as_str()) {
            respond_error(writer, "not authenticated").await?;
            return Ok(Flow::Continue);
        }

        match command.as_str() {
            "USER" => self.cmd_user(writer, args).await?,
            "QUIT" => {
                respond(writer, 205, "Bye").await?;
                return Ok(Flow::Quit);
            }
            "HELP" => self.cmd_help(writer).await?,
            "VERSION" => respond(writer, 200, &format!("zino version is {VERSION}")).await?,
            "CASEIDS" => self.cmd_caseids(writer).await?,
            "GETATTRS" => self.cmd_getattrs(writer, args).await?,
            "GETHIST" => self.cmd_gethist(writer, args).await?,
            "GETLOG" => self.cmd_getlog(writer, args).await?,
            "SETSTATE" => self.cmd_setstate(writer, args).await?,
            "ADDHIST" => self.cmd_addhist(reader, writer, args).await?,
            "COMMUNITY" => self.cmd_community(writer, args).await?,
            "NTIE" => self.cmd_ntie(writer, args).await?,
            "POLLRTR" => self.cmd_pollrtr(writer, args).await?,
            "POLLINTF" => self.cmd_pollintf(writer, args).await?,
            "CLEARFLAP" => self.cmd_clearflap(writer, args).await?,
            "PM" => self.cmd_pm(reader, writer, args).await?,
            _ => {
                debug!(command = %line, "unknown command");
                respond_error(writer, "Syntax error").await?;
            }
        }
        Ok(Flow::Continue)
    }

    async fn require_args<'a>(
        &self,
        writer: &mut Writer,
        command: &str,
        args: &'a [&'a str],
        count: usize,
    ) -> std::io::Result<Option<&'a [&'a str]>> {
        if args.len() < count {
            respond_error(writer, &format!("{command} needs {count} parameters")).await?;
            return Ok(None);
        }
        if args.len() > count {
            debug!(command, extra = ?&args[count..], "ignoring garbage arguments");
        }
        Ok(Some(&args[..count]))
    }

    /// Looks an event id argument up, reporting the protocol error itself.
    async fn resolve_event_id(
        &self,
        writer: &mut Writer,
        arg: &str,
    ) -> std::io::Result<Option<u32>> {
        let found = arg
            .parse::<u32>()
            .ok()
            .filter(|id| self.shared.engine.state().events.get(*id).is_some());
        if found.is_none() {
            respond_error(writer, &format!("event \"{arg}\" does not exist")).await?;
        }
        Ok(found)
    }

    async fn cmd_user(&mut self, writer: &mut Writer, args: &[&str]) -> std::io::Result<()> {
        if self.is_authenticated() {
            return respond_error(writer, "already authenticated").await;
        }
        if self.auth_attempted {
            // The challenge is one-shot; a fresh attempt needs a fresh
            // connection.
            return respond_error(writer, "challenge already used, reconnect").await;
        }
        let Some(args) = self.require_args(writer, "USER", args, 2).await? else {
            return Ok(());
        };
        self.auth_attempted = true;

        let secrets_file = self.shared.engine.config.authentication.file.clone();
        let users = match read_users(Path::new(&secrets_file)) {
            Ok(users) => users,
            Err(err) => {
                warn!(%err, "cannot read secrets file");
                return respond_error(writer, "Authentication failure").await;
            }
        };
        match auth::authenticate(&users, args[0], args[1], &self.challenge) {
            Ok(()) => {
                info!(user = args[0], "authenticated");
                self.user = Some(args[0].to_string());
                respond_ok(writer).await
            }
            Err(failure) => {
                // Identical delay and error for unknown users and wrong
                // passwords.
                tokio::time::sleep(Duration::from_millis(100)).await;
                respond_error(writer, &failure.to_string()).await
            }
        }
    }

    async fn cmd_help(&self, writer: &mut Writer) -> std::io::Result<()> {
        let mut commands: Vec<&str> = OPEN_COMMANDS.to_vec();
        if self.is_authenticated() {
            commands.extend(AUTH_COMMANDS);
            commands.sort_unstable();
        }
        let mut lines = vec!["commands are:".to_string()];
        lines.extend(wrap_words(&commands.join(" "), HELP_WRAP_COLUMNS));
        respond_data(writer, 300, "help follows, terminated with '.'", &lines).await
    }

    async fn cmd_caseids(&self, writer: &mut Writer) -> std::io::Result<()> {
        let ids: Vec<String> = {
            let state = self.shared.engine.state();
            state.events.iter_open().map(|e| e.id.to_string()).collect()
        };
        respond_data(
            writer,
            304,
            "list of active cases follows, terminated with '.'",
            &ids,
        )
        .await
    }

    /// Renders something from an event named by its id argument, reporting
    /// the protocol error itself when the id does not resolve.
    async fn with_event<T>(
        &self,
        writer: &mut Writer,
        arg: &str,
        render: impl FnOnce(&Event) -> T,
    ) -> std::io::Result<Option<T>> {
        let rendered = {
            let state = self.shared.engine.state();
            arg.parse::<u32>()
                .ok()
                .and_then(|id| state.events.get(id))
                .map(render)
        };
        if rendered.is_none() {
            respond_error(writer, &format!("event \"{arg}\" does not exist")).await?;
        }
        Ok(rendered)
    }

    async fn cmd_getattrs(&self, writer: &mut Writer, args: &[&str]) -> std::io::Result<()> {
        let Some(args) = self.require_args(writer, "GETATTRS", args, 1).await? else {
            return Ok(());
        };
        let Some(lines) = self.with_event(writer, args[0], legacy_attrs).await? else {
            return Ok(());
        };
        respond_data(
            writer,
            303,
            "simple attributes follow, terminated with '.'",
            &lines,
        )
        .await
    }

    async fn cmd_gethist(&self, writer: &mut Writer, args: &[&str]) -> std::io::Result<()> {
        let Some(args) = self.require_args(writer, "GETHIST", args, 1).await? else {
            return Ok(());
        };
        let Some(lines) = self
            .with_event(writer, args[0], |event| dump_entries(&event.history))
            .await?
        else {
            return Ok(());
        };
        respond_data(writer, 301, "history follows, terminated with '.'", &lines).await
    }

    async fn cmd_getlog(&self, writer: &mut Writer, args: &[&str]) -> std::io::Result<()> {
        let Some(args) = self.require_args(writer, "GETLOG", args, 1).await? else {
            return Ok(());
        };
        let Some(lines) = self
            .with_event(writer, args[0], |event| dump_entries(&event.log))
            .await?
        else {
            return Ok(());
        };
        respond_data(writer, 300, "log follows, terminated with '.'", &lines).await
    }

    async fn cmd_setstate(&self, writer: &mut Writer, args: &[&str]) -> std::io::Result<()> {
        let Some(args) = self.require_args(writer, "SETSTATE", args, 2).await? else {
            return Ok(());
        };
        let Some(id) = self.resolve_event_id(writer, args[0]).await? else {
            return Ok(());
        };
        let new_state = match args[1].parse::<EventState>() {
            Ok(state) if EventState::OPERATOR_STATES.contains(&state) => state,
            _ => {
                let allowed: Vec<&str> = EventState::OPERATOR_STATES
                    .iter()
                    .map(|s| s.as_str())
                    .collect();
                return respond_error(
                    writer,
                    &format!("state must be one of {}", allowed.join(", ")),
                )
                .await;
            }
        };

        let engine = &self.shared.engine;
        let checked_out = engine.state().events.checkout(id);
        let result = match checked_out {
            Ok(mut event) => match event.set_state(new_state, self.user()) {
                Ok(()) => engine.commit_event(event).map_err(|e| e.to_string()),
                Err(_) => Err(format!("Cannot reopen closed event {id}")),
            },
            Err(err) => Err(err.to_string()),
        };
        match result {
            Ok(()) => respond_ok(writer).await,
            Err(reason) => respond_error(writer, &reason).await,
        }
    }

    async fn cmd_addhist(
        &self,
        reader: &mut Reader,
        writer: &mut Writer,
        args: &[&str],
    ) -> std::io::Result<()> {
        let Some(args) = self.require_args(writer, "ADDHIST", args, 1).await? else {
            return Ok(());
        };
        let Some(id) = self.resolve_event_id(writer, args[0]).await? else {
            return Ok(());
        };
        respond(
            writer,
            302,
            "please provide new history entry, terminate with '.'",
        )
        .await?;
        let lines = read_multiline(reader).await?;
        let message = format!("{}\n{}", self.user(), lines.join("\n"));

        let result = {
            let engine = &self.shared.engine;
            let checked_out = engine.state().events.checkout(id);
            match checked_out {
                Ok(mut event) => {
                    event.add_history(message);
                    engine.commit_event(event).map_err(|e| e.to_string())
                }
                Err(err) => Err(err.to_string()),
            }
        };
        match result {
            Ok(()) => respond_ok(writer).await,
            Err(reason) => respond_error(writer, &reason).await,
        }
    }

    async fn cmd_community(&self, writer: &mut Writer, args: &[&str]) -> std::io::Result<()> {
        let Some(args) = self.require_args(writer, "COMMUNITY", args, 1).await? else {
            return Ok(());
        };
        match self.shared.engine.device(args[0]) {
            Some(device) => respond(writer, 201, &device.community).await,
            None => respond_error(writer, "router unknown").await,
        }
    }

    async fn cmd_ntie(&mut self, writer: &mut Writer, args: &[&str]) -> std::io::Result<()> {
        let Some(args) = self.require_args(writer, "NTIE", args, 1).await? else {
            return Ok(());
        };
        let Some(channel) = self.shared.channel(args[0]) else {
            return respond_error(writer, "Could not find your notify socket").await;
        };
        if !channel.tie() {
            return respond_error(writer, "notify channel already tied").await;
        }
        info!(nonce = %channel.nonce, "command session tied to notify channel");
        self.channel = Some(channel);
        respond_ok(writer).await
    }

    async fn cmd_pollrtr(&self, writer: &mut Writer, args: &[&str]) -> std::io::Result<()> {
        let Some(args) = self.require_args(writer, "POLLRTR", args, 1).await? else {
            return Ok(());
        };
        match self.shared.engine.device(args[0]) {
            Some(device) => {
                self.shared.scheduler.poll_router(&device);
                respond_ok(writer).await
            }
            None => respond_error(writer, &format!("Router {} unknown", args[0])).await,
        }
    }

    async fn cmd_pollintf(&self, writer: &mut Writer, args: &[&str]) -> std::io::Result<()> {
        let Some(args) = self.require_args(writer, "POLLINTF", args, 2).await? else {
            return Ok(());
        };
        let Some(device) = self.shared.engine.device(args[0]) else {
            return respond_error(writer, &format!("Router {} unknown", args[0])).await;
        };
        let Ok(ifindex) = args[1].parse::<u32>() else {
            return respond_error(writer, &format!("{} is an invalid ifindex value", args[1]))
                .await;
        };
        self.shared.scheduler.poll_interface(&device, ifindex);
        respond_ok(writer).await
    }

    async fn cmd_clearflap(&self, writer: &mut Writer, args: &[&str]) -> std::io::Result<()> {
        let Some(args) = self.require_args(writer, "CLEARFLAP", args, 2).await? else {
            return Ok(());
        };
        let Some(device) = self.shared.engine.device(args[0]) else {
            return respond_error(writer, &format!("Router {} unknown", args[0])).await;
        };
        let Ok(ifindex) = args[1].parse::<u32>() else {
            return respond_error(writer, &format!("{} is an invalid ifindex value", args[1]))
                .await;
        };

        let result = {
            let mut state = self.shared.engine.state();
            state.flapping.clear(&PortIndex::new(&device.name, ifindex));
            let key = EventKey {
                router: device.name.clone(),
                subindex: SubIndex::Interface(ifindex),
                kind: EventKind::PortState,
            };
            match state.events.lookup(&key).map(|e| e.id) {
                Some(event_id) => {
                    let mut event = state.events.checkout(event_id).expect("indexed event");
                    event.flaps = Some(0);
                    if let EventData::Portstate(data) = &mut event.data {
                        data.flapstate = Some(FlapState::Stable);
                    }
                    event.add_log(format!(
                        "{}: ix {} flap counters cleared by {}",
                        device.name,
                        ifindex,
                        self.user()
                    ));
                    state.commit_event(event).map_err(|e| e.to_string())
                }
                None => Ok(()),
            }
        };
        match result {
            Ok(()) => respond_ok(writer).await,
            Err(reason) => respond_error(writer, &reason).await,
        }
    }

    async fn cmd_pm(
        &self,
        reader: &mut Reader,
        writer: &mut Writer,
        args: &[&str],
    ) -> std::io::Result<()> {
        let Some(sub) = args.first() else {
            return respond_error(writer, "PM command requires a subcommand").await;
        };
        let sub_args = &args[1..];
        match sub.to_ascii_uppercase().as_str() {
            "HELP" => {
                let mut lines = vec!["PM subcommands are:".to_string()];
                lines.extend(wrap_words(
                    "ADD ADDLOG CANCEL DETAILS HELP LIST LOG MATCHING",
                    HELP_WRAP_COLUMNS,
                ));
                respond_data(writer, 300, "help follows, terminated with '.'", &lines).await
            }
            "LIST" => {
                let ids: Vec<String> = {
                    let state = self.shared.engine.state();
                    state
                        .planned_maintenances
                        .iter()
                        .map(|pm| pm.id.to_string())
                        .collect()
                };
                respond_data(writer, 300, "PM event ids follows, terminated with '.'", &ids).await
            }
            "ADD" => self.cmd_pm_add(writer, sub_args).await,
            "CANCEL" => {
                let Some(pm_id) = self.resolve_pm_id(writer, sub_args).await? else {
                    return Ok(());
                };
                {
                    let mut state = self.shared.engine.state();
                    crate::scheduler::end_planned_maintenance(&mut state, pm_id);
                    let _ = state
                        .planned_maintenances
                        .cancel(pm_id, "PM cancelled", self.user());
                }
                respond_ok(writer).await
            }
            "DETAILS" => {
                let Some(pm_id) = self.resolve_pm_id(writer, sub_args).await? else {
                    return Ok(());
                };
                let details = {
                    let state = self.shared.engine.state();
                    state
                        .planned_maintenances
                        .get(pm_id)
                        .map(|pm| pm.details())
                        .unwrap_or_default()
                };
                respond(writer, 200, &details).await
            }
            "MATCHING" => {
                let Some(pm_id) = self.resolve_pm_id(writer, sub_args).await? else {
                    return Ok(());
                };
                let lines = {
                    let state = self.shared.engine.state();
                    state
                        .planned_maintenances
                        .get(pm_id)
                        .map(|pm| pm.matching_lines(&state.devices))
                        .unwrap_or_default()
                };
                respond_data(
                    writer,
                    300,
                    "Matching ports/devices follows, terminated with '.'",
                    &lines,
                )
                .await
            }
            "ADDLOG" => {
                let Some(pm_id) = self.resolve_pm_id(writer, sub_args).await? else {
                    return Ok(());
                };
                respond(
                    writer,
                    302,
                    "please provide new PM log entry, terminate with '.'",
                )
                .await?;
                let lines = read_multiline(reader).await?;
                let message = format!("{}\n{}", self.user(), lines.join("\n"));
                {
                    let mut state = self.shared.engine.state();
                    if let Some(pm) = state.planned_maintenances.get_mut(pm_id) {
                        pm.add_log(message);
                    }
                }
                respond_ok(writer).await
            }
            "LOG" => {
                let Some(pm_id) = self.resolve_pm_id(writer, sub_args).await? else {
                    return Ok(());
                };
                let lines = {
                    let state = self.shared.engine.state();
                    state
                        .planned_maintenances
                        .get(pm_id)
                        .map(|pm| dump_entries(&pm.log))
                        .unwrap_or_default()
                };
                respond_data(writer, 300, "log follows, terminated with '.'", &lines).await
            }
            _ => respond_error(writer, "Syntax error").await,
        }
    }

    async fn resolve_pm_id(
        &self,
        writer: &mut Writer,
        args: &[&str],
    ) -> std::io::Result<Option<u32>> {
        let Some(arg) = args.first() else {
            respond_error(writer, "PM subcommand needs 1 parameters").await?;
            return Ok(None);
        };
        let found = arg
            .parse::<u32>()
            .ok()
            .filter(|id| self.shared.engine.state().planned_maintenances.get(*id).is_some());
        if found.is_none() {
            respond_error(writer, &format!("pm \"{arg}\" does not exist")).await?;
        }
        Ok(found)
    }

    async fn cmd_pm_add(&self, writer: &mut Writer, args: &[&str]) -> std::io::Result<()> {
        if args.len() < 5 {
            return respond_error(
                writer,
                "PM ADD needs from_t, to_t, type, match_type and match arguments",
            )
            .await;
        }
        let Some(start_time) = args[0]
            .parse::<i64>()
            .ok()
            .and_then(|t| DateTime::from_timestamp(t, 0))
        else {
            return respond_error(writer, "illegal from_t (param 1), must be only digits").await;
        };
        let Some(end_time) = args[1]
            .parse::<i64>()
            .ok()
            .and_then(|t| DateTime::from_timestamp(t, 0))
        else {
            return respond_error(writer, "illegal to_t (param 2), must be only digits").await;
        };
        if end_time < start_time {
            return respond_error(writer, "ending time is before starting time").await;
        }
        if start_time < Utc::now() {
            return respond_error(writer, "starting time is in the past").await;
        }
        let Ok(pm_type) = args[2].parse::<PmType>() else {
            return respond_error(writer, &format!("unknown PM event type: {}", args[2])).await;
        };
        let Ok(match_type) = args[3].parse::<MatchType>() else {
            return respond_error(writer, &format!("unknown match type: {}", args[3])).await;
        };

        let rest = &args[4..];
        let (match_device, match_expression) = if match_type == MatchType::IntfRegexp {
            if rest.len() < 2 {
                return respond_error(
                    writer,
                    "intf-regexp match type requires two extra arguments: match_device and match_expression",
                )
                .await;
            }
            (Some(rest[0].to_string()), rest[1].to_string())
        } else {
            (None, rest[0].to_string())
        };

        let pm_id = {
            let mut state = self.shared.engine.state();
            state.planned_maintenances.create(
                start_time,
                end_time,
                pm_type,
                match_type,
                match_expression,
                match_device,
            )
        };
        self.shared.engine.dump_soon.notify_one();
        respond(writer, 200, &format!("PM id {pm_id} successfully added")).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use zino_core::events::{Events, PortStateData};

    #[test]
    fn test_decode_line_strips_crlf_and_falls_back_to_latin1() {
        assert_eq!(decode_line(b"CASEIDS\r\n"), "CASEIDS");
        assert_eq!(decode_line(b"CASEIDS\n"), "CASEIDS");
        // 0xE6 is æ in Latin-1 but invalid UTF-8.
        assert_eq!(decode_line(&[0x41, 0xE6, b'\n']), "A\u{e6}");
    }

    #[test]
    fn test_wrap_words_respects_width() {
        let lines = wrap_words("AAA BBB CCC DDD", 7);
        assert_eq!(lines, vec!["AAA BBB", "CCC DDD"]);
    }

    #[test]
    fn test_legacy_attrs_use_hyphenated_names() {
        let mut events = Events::new();
        let (mut event, _) = events.get_or_create(
            "arkham-sw1",
            EventData::Portstate(PortStateData {
                ifindex: 150,
                port: Some("ge-1/0/10".to_string()),
                ..Default::default()
            }),
        );
        event.ac_down = Some(90_500);
        event.flaps = Some(4);
        let lines = legacy_attrs(&event);
        assert!(lines.contains(&"router: arkham-sw1".to_string()));
        assert!(lines.contains(&"ifindex: 150".to_string()));
        assert!(lines.contains(&"port: ge-1/0/10".to_string()));
        // Timedeltas are whole seconds.
        assert!(lines.contains(&"ac-down: 90".to_string()));
        assert!(lines.contains(&"flaps: 4".to_string()));
    }
}

// ABOUTME: Simulated FreeBSD jail host implementing Transport for integration tests.
// ABOUTME: Interprets the closed set of remote commands against in-memory host state.

use std::collections::{BTreeMap, BTreeSet};
use std::net::Ipv4Addr;
use std::time::Duration;

use async_trait::async_trait;
use jailwarden::ssh::{self, CommandOutput, OutputObserver, Transport};
use parking_lot::Mutex;
use tokio::io::AsyncRead;

pub const ROOT: &str = "/usr/local/jails";
pub const RELEASE: &str = "14.1-RELEASE";

/// Upload receiver standing in for `cat > path` on the host.
#[derive(Default)]
struct Received(Vec<u8>);

#[async_trait]
impl ssh::ChunkSink for Received {
    async fn send_chunk(&mut self, chunk: &[u8]) -> ssh::Result<()> {
        self.0.extend_from_slice(chunk);
        Ok(())
    }
}

/// In-memory view of the host. Tests read it through `FakeHost::state`.
#[derive(Debug, Default)]
pub struct HostState {
    /// Every command in the order it was issued, uploads as `upload <path>`.
    pub commands: Vec<String>,
    /// Running jails and their bound address.
    pub running: BTreeMap<String, Ipv4Addr>,
    /// Extra `jail -c` parameters per jail.
    pub params: BTreeMap<String, Vec<String>>,
    /// Jails whose application was launched.
    pub apps: BTreeSet<String>,
    pub dirs: BTreeSet<String>,
    pub files: BTreeMap<String, Vec<u8>>,
    pub loopback: bool,
    pub packages: BTreeSet<String>,
    pub services: BTreeSet<String>,
    pub reloads: usize,
    /// Addresses whose application never answers.
    pub unhealthy: BTreeSet<Ipv4Addr>,
    /// Remaining health probes that fail before the application answers.
    pub slow_start: u32,
    /// Commands containing the pattern exit non-zero.
    pub failures: Vec<String>,
    /// Output returned for `jexec` scripts containing the pattern.
    pub jexec_output: Vec<(String, String)>,
}

pub struct FakeHost {
    state: Mutex<HostState>,
}

impl FakeHost {
    /// A host with nothing on it.
    pub fn bare() -> Self {
        Self {
            state: Mutex::new(HostState::default()),
        }
    }

    /// A host after `setup`: template extracted, loopback up, proxy running.
    pub fn provisioned() -> Self {
        let host = Self::bare();
        {
            let mut state = host.state.lock();
            let template = format!("{}/templates/{}", ROOT, RELEASE);
            state.dirs.insert(format!("{}/templates", ROOT));
            state.dirs.insert(format!("{}/containers", ROOT));
            state.dirs.insert(template.clone());
            state
                .files
                .insert(format!("{}/bin/sh", template), b"ELF".to_vec());
            state.loopback = true;
            state.packages.insert("caddy".to_string());
            state.services.insert("caddy".to_string());
        }
        host
    }

    /// Place a unit on disk, optionally running with its application up.
    pub fn with_unit(self, name: &str, address: Ipv4Addr, running: bool) -> Self {
        {
            let mut state = self.state.lock();
            let path = unit_path(name);
            state.dirs.insert(path.clone());
            state.dirs.insert(format!("{}/app", path));
            if running {
                state.running.insert(name.to_string(), address);
                state.apps.insert(name.to_string());
            }
        }
        self
    }

    pub fn with_file(self, path: &str, contents: &str) -> Self {
        self.state
            .lock()
            .files
            .insert(path.to_string(), contents.as_bytes().to_vec());
        self
    }

    /// Make every command containing `pattern` exit 1.
    pub fn fail_on(&self, pattern: &str) {
        self.state.lock().failures.push(pattern.to_string());
    }

    pub fn unhealthy(&self, address: Ipv4Addr) {
        self.state.lock().unhealthy.insert(address);
    }

    /// Fail the first `probes` health probes.
    pub fn slow_start(&self, probes: u32) {
        self.state.lock().slow_start = probes;
    }

    pub fn respond_in_jail(&self, pattern: &str, output: &str) {
        self.state
            .lock()
            .jexec_output
            .push((pattern.to_string(), output.to_string()));
    }

    /// Direct access to the host state.
    pub fn state(&self) -> parking_lot::MutexGuard<'_, HostState> {
        self.state.lock()
    }

    pub fn commands(&self) -> Vec<String> {
        self.state.lock().commands.clone()
    }

    pub fn is_running(&self, name: &str) -> bool {
        self.state.lock().running.contains_key(name)
    }

    pub fn unit_exists(&self, name: &str) -> bool {
        self.state.lock().dirs.contains(&unit_path(name))
    }

    pub fn file(&self, path: &str) -> Option<String> {
        self.state
            .lock()
            .files
            .get(path)
            .map(|b| String::from_utf8_lossy(b).into_owned())
    }

    pub fn file_exists(&self, path: &str) -> bool {
        self.state.lock().files.contains_key(path)
    }

    fn execute(&self, command: &str) -> CommandOutput {
        let mut state = self.state.lock();
        state.commands.push(command.to_string());

        if state.failures.iter().any(|p| command.contains(p.as_str())) {
            return CommandOutput::new(1, format!("simulated failure: {}", command));
        }

        if command.starts_with("(set -C;") {
            return create_exclusive(&mut state, command);
        }

        let words = split_words(command);
        let word = |i: usize| words.get(i).map(String::as_str).unwrap_or("");

        match word(0) {
            "jls" => {
                let names: Vec<&str> = state.running.keys().map(String::as_str).collect();
                ok(names.join("\n"))
            }
            "test" => {
                let path = word(2);
                let found = match word(1) {
                    "-d" => state.dirs.contains(path),
                    "-f" => state.files.contains_key(path),
                    _ => state.dirs.contains(path) || state.files.contains_key(path),
                };
                if found {
                    ok(if words.iter().any(|w| w == "echo") { "exists\n" } else { "" })
                } else {
                    fail("")
                }
            }
            "mkdir" => {
                for dir in words.iter().skip(1).filter(|w| !w.starts_with('-')) {
                    state.dirs.insert(dir.clone());
                }
                ok("")
            }
            "cp" if word(1) == "-Rp" => {
                let (source, target) = (word(2).to_string(), word(3).to_string());
                if !state.dirs.contains(&source) {
                    return fail(&format!("cp: {}: No such file or directory", source));
                }
                let copies: Vec<(String, Vec<u8>)> = state
                    .files
                    .iter()
                    .filter_map(|(p, c)| {
                        p.strip_prefix(&format!("{}/", source))
                            .map(|rest| (format!("{}/{}", target, rest), c.clone()))
                    })
                    .collect();
                state.files.extend(copies);
                state.dirs.insert(target);
                ok("")
            }
            "cp" => {
                state
                    .files
                    .insert(word(2).to_string(), b"nameserver 192.0.2.53\n".to_vec());
                ok("")
            }
            "jail" if word(1) == "-c" => start_jail(&mut state, &words),
            "jail" if word(1) == "-r" => {
                let name = word(2).to_string();
                if state.running.remove(&name).is_none() {
                    return fail(&format!("jail: \"{}\" not found", name));
                }
                state.apps.remove(&name);
                ok("")
            }
            "chflags" => ok(""),
            "touch" => {
                state.files.insert(word(1).to_string(), Vec::new());
                ok("")
            }
            "rm" => {
                let path = word(2).to_string();
                let nested = format!("{}/", path);
                state.files.retain(|p, _| *p != path && !p.starts_with(&nested));
                if word(1) == "-rf" {
                    state.dirs.retain(|p| *p != path && !p.starts_with(&nested));
                }
                ok("")
            }
            "tar" => {
                let (archive, dest) = (word(2).to_string(), word(4).to_string());
                if !state.files.contains_key(&archive) {
                    return fail(&format!("tar: Error opening archive: {}", archive));
                }
                let marker = if word(1) == "-xzf" { "RELEASE" } else { "bin/sh" };
                state.files.insert(format!("{}/{}", dest, marker), b"x".to_vec());
                ok("")
            }
            "jexec" => {
                let name = word(1).to_string();
                if !state.running.contains_key(&name) {
                    return fail(&format!("jexec: jail \"{}\" not found", name));
                }
                let script = word(4);
                if script.contains("daemon -f") {
                    state.apps.insert(name);
                }
                let output = state
                    .jexec_output
                    .iter()
                    .find(|(pattern, _)| script.contains(pattern.as_str()))
                    .map(|(_, out)| out.clone())
                    .unwrap_or_default();
                ok(output)
            }
            "fetch" if words.iter().any(|w| w == "/dev/null") => {
                probe(&mut state, words.last().map(String::as_str).unwrap_or(""))
            }
            "fetch" => {
                state.files.insert(word(3).to_string(), b"base".to_vec());
                ok("")
            }
            "cat" => match state.files.get(word(1)) {
                Some(contents) => ok(String::from_utf8_lossy(contents).into_owned()),
                None => fail(&format!("cat: {}: No such file or directory", word(1))),
            },
            "tail" => {
                let path = words.last().map(String::as_str).unwrap_or("");
                match state.files.get(path) {
                    Some(contents) => ok(String::from_utf8_lossy(contents).into_owned()),
                    None => fail(&format!("tail: {}: No such file or directory", path)),
                }
            }
            "ifconfig" => {
                if state.loopback {
                    ok("lo1: flags=8049<UP,LOOPBACK,RUNNING,MULTICAST>")
                } else {
                    fail("ifconfig: interface lo1 does not exist")
                }
            }
            "service" => match (word(1), word(2)) {
                ("netif", "cloneup") => {
                    state.loopback = true;
                    ok("")
                }
                (name, "status") => {
                    if state.services.contains(name) {
                        ok(format!("{} is running", name))
                    } else {
                        fail(&format!("{} is not running", name))
                    }
                }
                (name, "start") => {
                    state.services.insert(name.to_string());
                    ok("")
                }
                (_, "reload") => {
                    state.reloads += 1;
                    ok("")
                }
                _ => ok(""),
            },
            "pkg" => {
                let package = words.last().cloned().unwrap_or_default();
                let key = match words.iter().position(|w| w == "-c") {
                    Some(i) => format!("{}:{}", word(i + 1), package),
                    None => package,
                };
                if words.iter().any(|w| w == "install") {
                    state.packages.insert(key);
                    ok("")
                } else if state.packages.contains(&key) {
                    ok("")
                } else {
                    fail("")
                }
            }
            _ => ok(""),
        }
    }
}

#[async_trait]
impl Transport for FakeHost {
    async fn run(&self, command: &str, _timeout: Duration) -> ssh::Result<CommandOutput> {
        Ok(self.execute(command))
    }

    async fn upload_reader(
        &self,
        reader: &mut (dyn AsyncRead + Unpin + Send),
        remote_path: &str,
    ) -> ssh::Result<u64> {
        let mut received = Received::default();
        ssh::stream_chunks(reader, &mut received).await?;
        let contents = received.0;

        let mut state = self.state.lock();
        let label = format!("upload {}", remote_path);
        state.commands.push(label.clone());
        if state.failures.iter().any(|p| label.contains(p.as_str())) {
            return Err(ssh::Error::UploadFailed {
                remote: remote_path.to_string(),
                reason: "simulated failure".to_string(),
            });
        }

        let len = contents.len() as u64;
        state.files.insert(remote_path.to_string(), contents);
        Ok(len)
    }

    async fn run_streaming(
        &self,
        command: &str,
        observer: &dyn OutputObserver,
    ) -> ssh::Result<Option<i32>> {
        let out = self.execute(command);
        observer.on_output(out.output.as_bytes());
        Ok(Some(out.exit_code))
    }
}

pub fn unit_path(name: &str) -> String {
    format!("{}/containers/{}", ROOT, name)
}

fn ok(output: impl Into<String>) -> CommandOutput {
    CommandOutput::new(0, output)
}

fn fail(output: &str) -> CommandOutput {
    CommandOutput::new(1, output)
}

fn start_jail(state: &mut HostState, words: &[String]) -> CommandOutput {
    let param = |key: &str| {
        words
            .iter()
            .find_map(|w| w.strip_prefix(key).map(str::to_string))
            .unwrap_or_default()
    };
    let name = param("name=");
    let path = param("path=");
    let ip4 = param("ip4.addr=");

    if state.running.contains_key(&name) {
        return fail(&format!("jail: {}: already exists", name));
    }
    if !state.dirs.contains(&path) {
        return fail(&format!("jail: {}: No such file or directory", path));
    }

    let address = ip4
        .split('|')
        .nth(1)
        .and_then(|cidr| cidr.split('/').next())
        .and_then(|a| a.parse().ok())
        .unwrap_or(Ipv4Addr::UNSPECIFIED);
    let extra: Vec<String> = words
        .iter()
        .skip(2)
        .filter(|w| {
            !["name=", "path=", "host.hostname=", "ip4.addr="]
                .iter()
                .any(|k| w.starts_with(k))
                && w.as_str() != "persist"
        })
        .cloned()
        .collect();

    state.params.insert(name.clone(), extra);
    state.running.insert(name, address);
    ok("")
}

fn probe(state: &mut HostState, url: &str) -> CommandOutput {
    let address: Option<Ipv4Addr> = url
        .trim_start_matches("http://")
        .split(':')
        .next()
        .and_then(|a| a.parse().ok());

    let serving = address.is_some_and(|addr| {
        !state.unhealthy.contains(&addr)
            && state
                .running
                .iter()
                .any(|(name, bound)| *bound == addr && state.apps.contains(name))
    });

    if serving && state.slow_start > 0 {
        state.slow_start -= 1;
        return fail("fetch: Connection refused");
    }
    if serving {
        ok("")
    } else {
        fail(&format!("fetch: {}: Connection refused", url))
    }
}

/// `(set -C; echo '<json>' > "<path>") 2>/dev/null`
fn create_exclusive(state: &mut HostState, command: &str) -> CommandOutput {
    let Some(rest) = command.split_once("echo '").map(|(_, r)| r) else {
        return fail("");
    };
    let Some((quoted, tail)) = rest.split_once("' > \"") else {
        return fail("");
    };
    let path = tail.split('"').next().unwrap_or("");
    if state.files.contains_key(path) {
        return fail("");
    }
    let json = quoted.replace("'\\''", "'");
    state.files.insert(path.to_string(), format!("{}\n", json).into_bytes());
    ok("")
}

/// Split a command line the way `sh` would for the quoting `shell_quote` produces.
pub fn split_words(command: &str) -> Vec<String> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut in_word = false;
    let mut chars = command.chars();

    while let Some(c) = chars.next() {
        match c {
            '\'' => {
                in_word = true;
                for q in chars.by_ref() {
                    if q == '\'' {
                        break;
                    }
                    current.push(q);
                }
            }
            '"' => {
                in_word = true;
                for q in chars.by_ref() {
                    if q == '"' {
                        break;
                    }
                    current.push(q);
                }
            }
            '\\' => {
                in_word = true;
                if let Some(escaped) = chars.next() {
                    current.push(escaped);
                }
            }
            c if c.is_whitespace() => {
                if in_word {
                    words.push(std::mem::take(&mut current));
                    in_word = false;
                }
            }
            c => {
                in_word = true;
                current.push(c);
            }
        }
    }

    if in_word {
        words.push(current);
    }
    words
}

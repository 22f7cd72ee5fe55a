// ABOUTME: Builders for the closed set of remote commands issued against the jail subsystem.
// ABOUTME: Pure string construction; all state checks live in the SlotManager.

use super::unit::Unit;
use crate::ssh::shell_quote;

pub fn list_running() -> String {
    "jls name".to_string()
}

pub fn dir_exists(path: &str) -> String {
    format!("test -d {} && echo exists", shell_quote(path))
}

pub fn file_exists(path: &str) -> String {
    format!("test -f {} && echo exists", shell_quote(path))
}

pub fn touch(path: &str) -> String {
    format!("touch {}", shell_quote(path))
}

pub fn make_dirs(paths: &[&str]) -> String {
    let quoted: Vec<String> = paths.iter().map(|p| shell_quote(p)).collect();
    format!("mkdir -p {}", quoted.join(" "))
}

pub fn clone_template(template: &str, target: &str) -> String {
    format!("cp -Rp {} {}", shell_quote(template), shell_quote(target))
}

pub fn seed_resolver(unit: &Unit) -> String {
    format!(
        "cp /etc/resolv.conf {}",
        shell_quote(&unit.host_path("/etc/resolv.conf"))
    )
}

pub fn start(unit: &Unit, interface: &str) -> String {
    start_with(unit, interface, &[])
}

/// `start` with extra `jail(8)` parameters such as `sysvshm=new`.
pub fn start_with(unit: &Unit, interface: &str, params: &[&str]) -> String {
    let ip4 = format!("{}|{}/{}", interface, unit.address, unit.prefix_len);
    let mut command = format!(
        "jail -c name={} path={} host.hostname={} ip4.addr={}",
        shell_quote(&unit.name),
        shell_quote(&unit.path),
        shell_quote(&unit.name),
        shell_quote(&ip4)
    );
    for param in params {
        command.push(' ');
        command.push_str(&shell_quote(param));
    }
    command.push_str(" persist");
    command
}

pub fn stop(name: &str) -> String {
    format!("jail -r {}", shell_quote(name))
}

pub fn clear_flags(path: &str) -> String {
    format!("chflags -R noschg {}", shell_quote(path))
}

pub fn remove(path: &str) -> String {
    format!("rm -rf {}", shell_quote(path))
}

pub fn extract(archive: &str, dest: &str) -> String {
    format!("tar -xzf {} -C {}", shell_quote(archive), shell_quote(dest))
}

/// Run `script` through `/bin/sh` inside the named jail.
pub fn exec_in(name: &str, script: &str) -> String {
    format!("jexec {} /bin/sh -c {}", shell_quote(name), shell_quote(script))
}

pub fn tail(path: &str, lines: u32, follow: bool) -> String {
    if follow {
        format!("tail -n {} -F {}", lines, shell_quote(path))
    } else {
        format!("tail -n {} {}", lines, shell_quote(path))
    }
}

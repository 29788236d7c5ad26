use super::*;

use anyhow::{anyhow, Result};
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

const DOMAIN_XML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<domain log-root="${com.sun.aas.instanceRoot}/logs" application-root="${com.sun.aas.instanceRoot}/applications">
  <system-applications/>
  <nodes>
    <node name="localhost-domain1" type="CONFIG" node-host="localhost" install-dir="${com.sun.aas.productRoot}"/>
    <node name="web-1" type="SSH" node-host="web1.example.test" install-dir="/opt/payara">
      <ssh-connector ssh-port="2222">
        <ssh-auth user-name="payara" password="s3cret"/>
      </ssh-connector>
    </node>
    <node name="web-2" type="SSH" node-host="web2.example.test">
      <ssh-connector>
        <ssh-auth user-name="deploy" key-file="/home/deploy/.ssh/id_rsa" key-passphrase="phrase"/>
      </ssh-connector>
    </node>
  </nodes>
</domain>
"#;

fn test_dir(label: &str) -> PathBuf {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("system time")
        .as_nanos();
    let dir = std::env::temp_dir().join(format!(
        "upshift-nodes-{label}-{}-{nanos}",
        std::process::id()
    ));
    fs::create_dir_all(&dir).expect("must create test dir");
    dir
}

fn parsed_nodes() -> Vec<NodeDescriptor> {
    parse_domain_xml(DOMAIN_XML, Path::new("/opt/payara6")).expect("must parse domain.xml")
}

fn node(name: &str) -> NodeDescriptor {
    parsed_nodes()
        .into_iter()
        .find(|node| node.name == name)
        .expect("node must exist")
}

/// Records every command and answers from a per-host script.
#[derive(Default)]
struct FakeExecutor {
    commands: RefCell<Vec<AdminCommand>>,
    responses: BTreeMap<String, FakeResponse>,
}

#[derive(Clone)]
enum FakeResponse {
    Output(CommandOutput),
    Timeout,
}

impl FakeExecutor {
    fn respond(mut self, last_arg: &str, response: FakeResponse) -> Self {
        self.responses.insert(last_arg.to_string(), response);
        self
    }

    fn recorded(&self) -> Vec<AdminCommand> {
        self.commands.borrow().clone()
    }
}

fn ok_output(stdout: &str) -> CommandOutput {
    CommandOutput {
        status: Some(0),
        success: true,
        stdout: stdout.to_string(),
        stderr: String::new(),
    }
}

impl CommandExecutor for FakeExecutor {
    fn execute(&self, command: &AdminCommand) -> Result<CommandOutput, DispatchError> {
        self.commands.borrow_mut().push(command.clone());
        let key = command.args.last().cloned().unwrap_or_default();
        match self.responses.get(&key) {
            Some(FakeResponse::Output(output)) => Ok(output.clone()),
            Some(FakeResponse::Timeout) => Err(DispatchError::Timeout {
                program: command.program.display().to_string(),
                timeout_ms: command.timeout.as_millis(),
            }),
            None => Ok(ok_output("Command install-node-ssh executed successfully.")),
        }
    }
}

struct FakeStore {
    domains: Vec<(DomainRecord, Vec<NodeDescriptor>)>,
    fail_parse: bool,
}

impl FakeStore {
    fn single_domain() -> Self {
        Self {
            domains: vec![(
                DomainRecord {
                    name: "domain1".to_string(),
                    dir: PathBuf::from("/opt/payara6/glassfish/domains/domain1"),
                },
                parsed_nodes(),
            )],
            fail_parse: false,
        }
    }
}

impl DomainConfigStore for FakeStore {
    fn list_domains(&self) -> Result<Vec<DomainRecord>> {
        Ok(self.domains.iter().map(|(domain, _)| domain.clone()).collect())
    }

    fn parse_domain_nodes(&self, domain: &DomainRecord) -> Result<Vec<NodeDescriptor>> {
        if self.fail_parse {
            return Err(anyhow!("domain.xml of {} is unreadable", domain.name));
        }
        Ok(self
            .domains
            .iter()
            .find(|(candidate, _)| candidate == domain)
            .map(|(_, nodes)| nodes.clone())
            .unwrap_or_default())
    }

    fn backup_domain(&self, _domain: &DomainRecord) -> Result<()> {
        Ok(())
    }

    fn restore_domain(&self, _domain: &DomainRecord) -> Result<()> {
        Ok(())
    }
}

#[test]
fn parse_domain_xml_reads_nodes_and_defaults() {
    let nodes = parsed_nodes();
    assert_eq!(nodes.len(), 3);

    let config = &nodes[0];
    assert!(!config.is_ssh());
    assert_eq!(config.install_dir, "/opt/payara6");

    let web1 = &nodes[1];
    assert!(web1.is_ssh());
    assert_eq!(web1.host, "web1.example.test");
    assert_eq!(web1.ssh_port, "2222");
    assert_eq!(web1.ssh_user, "payara");
    assert_eq!(web1.ssh_password.as_ref().map(Secret::expose), Some("s3cret"));
    assert!(web1.ssh_key_file.is_none());

    let web2 = &nodes[2];
    assert_eq!(web2.ssh_port, "22");
    assert_eq!(web2.install_dir, "/opt/payara6");
    assert_eq!(web2.ssh_key_file.as_deref(), Some("/home/deploy/.ssh/id_rsa"));
    assert!(web2.ssh_password.is_none());
}

#[test]
fn domain_without_nodes_has_no_descriptors() {
    let nodes = parse_domain_xml("<domain><configs/></domain>", Path::new("/opt"))
        .expect("must parse");
    assert!(nodes.is_empty());
    assert!(parse_domain_xml("<domain>", Path::new("/opt")).is_err());
}

#[test]
fn secrets_are_redacted_in_debug_output() {
    let rendered = format!("{:?}", node("web-1"));
    assert!(!rendered.contains("s3cret"));
    assert!(rendered.contains("Secret(***)"));
}

#[test]
fn ssh_nodes_skip_other_node_types() {
    let domain = DomainRecord {
        name: "domain1".to_string(),
        dir: PathBuf::from("domains/domain1"),
    };
    let names = ssh_nodes(&domain, parsed_nodes())
        .into_iter()
        .map(|node| node.name)
        .collect::<Vec<_>>();
    assert_eq!(names, vec!["web-1", "web-2"]);
}

#[test]
fn remote_install_command_keeps_password_out_of_argv() {
    let command = build_remote_install_command(
        Path::new("/opt/payara6/glassfish/bin/asadmin"),
        &node("web-1"),
        None,
        DEFAULT_REMOTE_TIMEOUT,
    );
    assert_eq!(
        command.args,
        vec![
            "--interactive=false",
            "--passwordfile",
            "-",
            "install-node-ssh",
            "--installdir",
            "/opt/payara",
            "--force",
            "--sshport",
            "2222",
            "--sshuser",
            "payara",
            "web1.example.test",
        ]
    );
    assert!(command.args.iter().all(|arg| !arg.contains("s3cret")));
    let stdin = command
        .stdin_lines
        .iter()
        .map(Secret::expose)
        .collect::<Vec<_>>();
    assert_eq!(stdin, vec!["AS_ADMIN_SSHPASSWORD=s3cret"]);
    assert_eq!(command.timeout, Duration::from_millis(300_000));
}

#[test]
fn remote_install_command_with_key_file_sends_passphrase_on_stdin() {
    let command = build_remote_install_command(
        Path::new("asadmin"),
        &node("web-2"),
        None,
        DEFAULT_REMOTE_TIMEOUT,
    );
    let key_index = command
        .args
        .iter()
        .position(|arg| arg == "--sshkeyfile")
        .expect("must pass key file");
    assert_eq!(command.args[key_index + 1], "/home/deploy/.ssh/id_rsa");
    assert!(command.args.iter().all(|arg| !arg.contains("phrase")));
    assert_eq!(command.args.last().map(String::as_str), Some("web2.example.test"));
    let stdin = command
        .stdin_lines
        .iter()
        .map(Secret::expose)
        .collect::<Vec<_>>();
    assert_eq!(stdin, vec!["AS_ADMIN_SSHKEYPASSPHRASE=phrase"]);
}

#[test]
fn archive_is_only_passed_when_readable() {
    let dir = test_dir("archive");
    let archive = dir.join("payara-6.2024.1.zip");

    let missing = build_remote_install_command(
        Path::new("asadmin"),
        &node("web-1"),
        Some(&archive),
        DEFAULT_REMOTE_TIMEOUT,
    );
    assert!(!missing.args.iter().any(|arg| arg == "--archive"));

    fs::write(&archive, b"zip").expect("must write archive");
    let present = build_remote_install_command(
        Path::new("asadmin"),
        &node("web-1"),
        Some(&archive),
        DEFAULT_REMOTE_TIMEOUT,
    );
    let index = present
        .args
        .iter()
        .position(|arg| arg == "--archive")
        .expect("must pass archive");
    assert_eq!(present.args[index + 1], archive.display().to_string());
    assert_eq!(present.args.last().map(String::as_str), Some("web1.example.test"));

    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn propagate_dispatches_only_ssh_nodes() {
    let executor = FakeExecutor::default();
    let dispatcher = RemoteDispatcher::new(&executor, "asadmin");
    let report = dispatcher
        .propagate(&FakeStore::single_domain(), None)
        .expect("must propagate");

    assert_eq!(executor.recorded().len(), 2);
    assert_eq!(report.attempted, vec!["web-1", "web-2"]);
    assert!(report.failed.is_empty());
    assert_eq!(report.skipped, vec!["localhost-domain1"]);
    assert!(report.is_success());
}

#[test]
fn failing_node_does_not_stop_later_nodes() {
    let executor = FakeExecutor::default().respond("web1.example.test", FakeResponse::Timeout);
    let dispatcher = RemoteDispatcher::new(&executor, "asadmin");
    let report = dispatcher
        .propagate(&FakeStore::single_domain(), None)
        .expect("must propagate");

    assert_eq!(executor.recorded().len(), 2);
    assert_eq!(report.failed, vec!["web-1"]);
    assert!(!report.is_success());
}

#[test]
fn failure_marker_and_exit_status_fail_the_node() {
    let marker = FakeExecutor::default().respond(
        "web1.example.test",
        FakeResponse::Output(ok_output("remote: Command install-node-ssh failed.")),
    );
    assert!(!RemoteDispatcher::new(&marker, "asadmin").run_remote_install(&node("web-1"), None));

    let exit = FakeExecutor::default().respond(
        "web1.example.test",
        FakeResponse::Output(CommandOutput {
            status: Some(1),
            success: false,
            ..CommandOutput::default()
        }),
    );
    assert!(!RemoteDispatcher::new(&exit, "asadmin").run_remote_install(&node("web-1"), None));

    let custom = FakeExecutor::default().respond(
        "web1.example.test",
        FakeResponse::Output(ok_output("node install broke")),
    );
    let dispatcher = RemoteDispatcher::new(&custom, "asadmin").with_failure_marker("broke");
    assert!(!dispatcher.run_remote_install(&node("web-1"), None));

    let fine = FakeExecutor::default();
    assert!(RemoteDispatcher::new(&fine, "asadmin").run_remote_install(&node("web-1"), None));
}

#[test]
fn unreadable_domain_configuration_is_an_error() {
    let executor = FakeExecutor::default();
    let mut store = FakeStore::single_domain();
    store.fail_parse = true;
    let err = RemoteDispatcher::new(&executor, "asadmin")
        .propagate(&store, None)
        .expect_err("must fail");
    assert!(err.to_string().contains("unreadable"));
    assert!(executor.recorded().is_empty());
}

#[test]
fn admin_script_store_lists_domains_and_runs_backup() {
    let dir = test_dir("store");
    let domains_dir = dir.join("glassfish").join("domains");
    for name in ["domain2", "domain1"] {
        let config = domains_dir.join(name).join("config");
        fs::create_dir_all(&config).expect("must create config dir");
        fs::write(config.join("domain.xml"), DOMAIN_XML).expect("must write domain.xml");
    }
    fs::create_dir_all(domains_dir.join("not-a-domain")).expect("must create dir");

    let executor = FakeExecutor::default().respond(
        "domain2",
        FakeResponse::Output(CommandOutput {
            status: Some(1),
            success: false,
            stdout: String::new(),
            stderr: "domain is running".to_string(),
        }),
    );
    let store = AdminScriptDomainStore::new("bin/asadmin", &domains_dir, &dir, &executor);

    let domains = store.list_domains().expect("must list domains");
    let names = domains.iter().map(|domain| domain.name.as_str()).collect::<Vec<_>>();
    assert_eq!(names, vec!["domain1", "domain2"]);

    let nodes = store.parse_domain_nodes(&domains[0]).expect("must parse nodes");
    assert_eq!(nodes[0].install_dir, dir.display().to_string());

    store.backup_domain(&domains[0]).expect("backup must succeed");
    let err = store.restore_domain(&domains[1]).expect_err("restore must fail");
    assert!(err.to_string().contains("domain is running"));

    let recorded = executor.recorded();
    assert_eq!(
        recorded[0].args,
        vec![
            "--interactive=false".to_string(),
            "backup-domain".to_string(),
            "--domaindir".to_string(),
            domains_dir.display().to_string(),
            "domain1".to_string(),
        ]
    );
    assert_eq!(recorded[1].args[1], "restore-domain");

    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn missing_domains_dir_lists_nothing() {
    let dir = test_dir("no-domains");
    let executor = FakeExecutor::default();
    let store = AdminScriptDomainStore::new("asadmin", dir.join("domains"), &dir, &executor);
    assert!(store.list_domains().expect("must list").is_empty());

    let _ = fs::remove_dir_all(&dir);
}

#[cfg(unix)]
#[test]
fn process_executor_feeds_stdin_and_collects_output() {
    let executor = ProcessExecutor::new(false);
    let command = AdminCommand {
        program: PathBuf::from("/bin/sh"),
        args: vec!["-c".to_string(), "cat; echo done >&2".to_string()],
        stdin_lines: vec![Secret::new("AS_ADMIN_SSHPASSWORD=pw")],
        timeout: Duration::from_secs(10),
    };
    let output = executor.execute(&command).expect("must run");
    assert!(output.success);
    assert_eq!(output.stdout, "AS_ADMIN_SSHPASSWORD=pw\n");
    assert_eq!(output.stderr, "done\n");
}

#[cfg(unix)]
#[test]
fn process_executor_keeps_reading_past_invalid_utf8() {
    let executor = ProcessExecutor::new(false);
    let command = AdminCommand {
        program: PathBuf::from("/bin/sh"),
        args: vec![
            "-c".to_string(),
            "printf 'Verbindung \\377 fehlgeschlagen\\n'; echo 'Command install-node-ssh failed'; exit 0"
                .to_string(),
        ],
        stdin_lines: Vec::new(),
        timeout: Duration::from_secs(10),
    };
    let output = executor.execute(&command).expect("must run");
    assert!(output.success);
    assert_eq!(
        output.stdout,
        "Verbindung \u{fffd} fehlgeschlagen\nCommand install-node-ssh failed\n"
    );
}

#[cfg(unix)]
#[test]
fn remote_install_with_marker_after_invalid_utf8_fails() {
    let dir = test_dir("utf8-marker");
    let script = dir.join("asadmin");
    fs::write(
        &script,
        "#!/bin/sh\nprintf 'Verbindung \\377 fehlgeschlagen\\n'\necho 'Command install-node-ssh failed'\nexit 0\n",
    )
    .expect("must write script");
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(&script, fs::Permissions::from_mode(0o755))
            .expect("must mark script executable");
    }

    let executor = ProcessExecutor::new(false);
    let dispatcher = RemoteDispatcher::new(&executor, &script);
    assert!(!dispatcher.run_remote_install(&node("web-1"), None));

    let _ = fs::remove_dir_all(&dir);
}

#[cfg(unix)]
#[test]
fn process_executor_kills_command_after_timeout() {
    let executor = ProcessExecutor::new(false);
    let command = AdminCommand {
        program: PathBuf::from("/bin/sh"),
        args: vec!["-c".to_string(), "exec sleep 30".to_string()],
        stdin_lines: Vec::new(),
        timeout: Duration::from_millis(200),
    };
    let started = std::time::Instant::now();
    let err = executor.execute(&command).expect_err("must time out");
    assert!(matches!(err, DispatchError::Timeout { .. }));
    assert!(started.elapsed() < Duration::from_secs(10));
}

#[test]
fn process_executor_reports_spawn_failure() {
    let executor = ProcessExecutor::new(false);
    let command = AdminCommand {
        program: PathBuf::from("/definitely/not/an/admin/script"),
        args: Vec::new(),
        stdin_lines: Vec::new(),
        timeout: Duration::from_secs(1),
    };
    let err = executor.execute(&command).expect_err("must fail to spawn");
    assert!(matches!(err, DispatchError::Spawn { .. }));
}

//! Launching and stopping the subject process

use std::io::{BufRead, BufReader, Read};
use std::process::{Child, Command, Stdio};
use std::sync::Arc;
use std::time::Duration;

use crate::common::config::{OutputConfig, SubjectConfig};
use crate::common::{Error, Result};

use super::control::{lock, OutputBuffer, ProcessControl, SubjectShared};
use super::{preempt, Lifecycle, SubjectControl};

/// How often a stopping subject is polled during the grace period
const STOP_POLL_MS: u64 = 20;

/// Subject lifecycle backed by a local process
///
/// With no command configured the subject is treated as externally managed:
/// start launches nothing, stop has nothing to terminate, and
/// the readiness probe does all the work.
pub struct ProcessSubject {
    config: SubjectConfig,
    shared: Arc<SubjectShared>,
    control: ProcessControl,
}

impl ProcessSubject {
    pub fn new(config: SubjectConfig, port: u16, output: &OutputConfig) -> Self {
        let shared = Arc::new(SubjectShared::new(
            config.host.clone(),
            port,
            output.artifacts_dir.clone(),
            output.max_lines,
            config.command.is_some(),
        ));
        Self {
            control: ProcessControl::new(shared.clone()),
            shared,
            config,
        }
    }

    pub fn output(&self) -> &OutputBuffer {
        &self.shared.output
    }

    fn spawn(&mut self, program: &str) -> Result<()> {
        let mut command = Command::new(program);
        command
            .args(&self.config.args)
            .envs(&self.config.env)
            .env("PORT", self.shared.port.to_string())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(cwd) = &self.config.cwd {
            command.current_dir(cwd);
        }
        // Own process group, so teardown reaches whatever a wrapper shell forks
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            command.process_group(0);
        }

        tracing::info!(
            "Starting subject: {} {} (PORT={})",
            program,
            self.config.args.join(" "),
            self.shared.port
        );
        let mut child = command
            .spawn()
            .map_err(|e| Error::SubjectStart(format!("could not spawn '{}': {}", program, e)))?;

        // Readers are detached; they end when the last holder of the pipe exits
        if let Some(stdout) = child.stdout.take() {
            drain("stdout", stdout, self.shared.output.clone());
        }
        if let Some(stderr) = child.stderr.take() {
            drain("stderr", stderr, self.shared.output.clone());
        }
        *lock(&self.shared.stdin) = child.stdin.take();

        tracing::debug!("Subject running with pid {}", child.id());
        *lock(&self.shared.child) = Some(child);
        Ok(())
    }

    fn last_output(&self) -> String {
        self.shared
            .output
            .tail(Some(1))
            .pop()
            .map(|line| format!(" (last output: {line})"))
            .unwrap_or_default()
    }
}

/// Forward one output stream of the subject into the shared buffer
fn drain<R: Read + Send + 'static>(stream: &'static str, source: R, buffer: OutputBuffer) {
    std::thread::spawn(move || {
        for line in BufReader::new(source).lines() {
            match line {
                Ok(line) => {
                    tracing::trace!(target: "specrun::subject", "[{}] {}", stream, line);
                    buffer.push(line);
                }
                Err(_) => break,
            }
        }
    });
}

#[async_trait::async_trait]
impl Lifecycle for ProcessSubject {
    async fn start(&mut self) -> Result<()> {
        if self.config.preempt_port {
            if self.config.command.is_some() {
                preempt::free_port(&self.shared.host, self.shared.port).await?;
            } else {
                tracing::warn!("Ignoring preempt_port: the subject is managed externally");
            }
        }

        match self.config.command.clone() {
            Some(program) => self.spawn(&program),
            None => {
                tracing::info!(
                    "No subject command configured; expecting a subject on {}:{}",
                    self.shared.host,
                    self.shared.port
                );
                Ok(())
            }
        }
    }

    fn check_alive(&mut self) -> Result<()> {
        let exited = {
            let mut child = lock(&self.shared.child);
            match child.as_mut().map(Child::try_wait) {
                Some(Ok(Some(status))) => Some(status),
                Some(Err(e)) => return Err(Error::SubjectStart(format!("could not poll subject: {e}"))),
                _ => None,
            }
        };

        match exited {
            Some(status) => Err(Error::SubjectStart(format!(
                "subject exited with {} before accepting connections{}",
                status,
                self.last_output()
            ))),
            None => Ok(()),
        }
    }

    fn stop(&mut self) -> Result<()> {
        // Closing stdin first lets well-behaved subjects exit on EOF
        lock(&self.shared.stdin).take();

        let Some(mut child) = lock(&self.shared.child).take() else {
            return Ok(());
        };

        if let Ok(Some(status)) = child.try_wait() {
            tracing::debug!("Subject already exited with {}", status);
        } else {
            tracing::info!("Stopping subject (pid {})", child.id());
        }
        // Descendants may outlive the process we spawned
        terminate(&mut child, Duration::from_millis(self.config.stop_grace_ms))
    }

    fn control(&mut self) -> &mut dyn SubjectControl {
        &mut self.control
    }
}

impl Drop for ProcessSubject {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

/// Ask the subject's process group to exit, then kill it once `grace` has passed
fn terminate(child: &mut Child, grace: Duration) -> Result<()> {
    #[cfg(unix)]
    {
        let group = -(child.id() as libc::pid_t);
        // SAFETY: signal delivery to the process group created at spawn
        let rc = unsafe { libc::kill(group, libc::SIGTERM) };
        if rc == 0 {
            let deadline = std::time::Instant::now() + grace;
            let mut exited = false;
            while std::time::Instant::now() < deadline {
                if !exited {
                    if let Ok(Some(status)) = child.try_wait() {
                        tracing::debug!("Subject exited with {}", status);
                        exited = true;
                    }
                }
                if exited && !group_alive(group) {
                    return Ok(());
                }
                std::thread::sleep(Duration::from_millis(STOP_POLL_MS));
            }
            tracing::warn!(
                "Subject ignored SIGTERM for {}ms, killing its process group",
                grace.as_millis()
            );
            // SAFETY: as above
            unsafe { libc::kill(group, libc::SIGKILL) };
        }
    }
    #[cfg(not(unix))]
    let _ = grace;

    let _ = child.kill();
    child.wait()?;
    Ok(())
}

#[cfg(unix)]
fn group_alive(group: libc::pid_t) -> bool {
    // SAFETY: signal 0 only checks for existence
    unsafe { libc::kill(group, 0) == 0 }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::time::Instant;

    fn subject(command: Option<&str>, args: &[&str]) -> ProcessSubject {
        let config = SubjectConfig {
            command: command.map(String::from),
            args: args.iter().map(|s| s.to_string()).collect(),
            stop_grace_ms: 200,
            ..SubjectConfig::default()
        };
        ProcessSubject::new(config, 4999, &OutputConfig::default())
    }

    fn wait_for_output(subject: &ProcessSubject, needle: &str) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if subject.output().tail(None).iter().any(|l| l.contains(needle)) {
                return true;
            }
            std::thread::sleep(Duration::from_millis(20));
        }
        false
    }

    #[tokio::test]
    async fn test_port_is_passed_and_output_captured() {
        let mut subject = subject(Some("sh"), &["-c", "echo listening on $PORT; exec sleep 30"]);
        subject.start().await.unwrap();
        assert!(wait_for_output(&subject, "listening on 4999"));
        assert!(subject.check_alive().is_ok());

        subject.stop().unwrap();
        let status = subject.control().status().unwrap();
        assert_eq!(status.pid, None);
        assert_eq!(status.running, Some(false));
    }

    #[tokio::test]
    async fn test_send_input_reaches_subject() {
        let mut subject = subject(Some("sh"), &["-c", "read line; echo got $line; exec sleep 30"]);
        subject.start().await.unwrap();
        subject.control().send_input("ping").unwrap();
        assert!(wait_for_output(&subject, "got ping"));
        subject.stop().unwrap();
    }

    #[tokio::test]
    async fn test_early_exit_is_reported() {
        let mut subject = subject(Some("sh"), &["-c", "echo bad config >&2; exit 3"]);
        subject.start().await.unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        let err = loop {
            if let Err(e) = subject.check_alive() {
                break e;
            }
            assert!(Instant::now() < deadline, "subject never exited");
            std::thread::sleep(Duration::from_millis(20));
        };
        assert!(matches!(err, Error::SubjectStart(_)));
        assert!(err.to_string().contains("exited"));
    }

    #[tokio::test]
    async fn test_missing_binary_fails_start() {
        let mut subject = subject(Some("/nonexistent/specrun-subject"), &[]);
        let err = subject.start().await.unwrap_err();
        assert!(err.to_string().contains("could not spawn"));
    }

    #[tokio::test]
    async fn test_stop_is_idempotent_and_kills_stubborn_subjects() {
        let mut subject = subject(Some("sh"), &["-c", "trap '' TERM; echo ready; exec sleep 30"]);
        subject.start().await.unwrap();
        assert!(wait_for_output(&subject, "ready"));

        let started = Instant::now();
        subject.stop().unwrap();
        assert!(started.elapsed() < Duration::from_secs(5));
        subject.stop().unwrap();
    }

    #[cfg(target_os = "linux")]
    fn process_running(pid: u32) -> bool {
        // Reaped or zombie both count as gone
        match std::fs::read_to_string(format!("/proc/{pid}/stat")) {
            Ok(stat) => stat
                .rsplit(')')
                .next()
                .is_some_and(|rest| !rest.trim_start().starts_with('Z')),
            Err(_) => false,
        }
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_stop_reaches_processes_forked_by_wrapper_shell() {
        let mut subject = subject(Some("sh"), &["-c", "sleep 30 & echo worker $!; wait"]);
        subject.start().await.unwrap();
        assert!(wait_for_output(&subject, "worker "));

        let line = subject
            .output()
            .tail(None)
            .into_iter()
            .find(|l| l.starts_with("worker "))
            .unwrap();
        let worker: u32 = line["worker ".len()..].trim().parse().unwrap();
        assert!(process_running(worker));

        subject.stop().unwrap();

        let deadline = Instant::now() + Duration::from_secs(2);
        while process_running(worker) && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(20));
        }
        assert!(!process_running(worker), "worker {worker} survived teardown");
    }

    #[tokio::test]
    async fn test_preemption_skipped_for_external_subject() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let config = SubjectConfig {
            preempt_port: true,
            ..SubjectConfig::default()
        };
        let mut subject = ProcessSubject::new(config, port, &OutputConfig::default());

        let started = Instant::now();
        subject.start().await.unwrap();
        assert!(started.elapsed() < Duration::from_secs(1));
        assert!(std::net::TcpStream::connect(("127.0.0.1", port)).is_ok());
    }

    #[tokio::test]
    async fn test_external_subject_has_nothing_to_stop() {
        let mut subject = subject(None, &[]);
        subject.start().await.unwrap();
        assert!(subject.check_alive().is_ok());
        subject.stop().unwrap();
        let status = subject.control().status().unwrap();
        assert!(!status.managed);
        assert_eq!(status.running, None);
    }
}

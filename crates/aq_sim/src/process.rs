// crates/aq_sim/src/process.rs

//! 子进程生命周期
//!
//! 语义要求："阻塞直到子进程退出且 stdout 被读完"。
//! stdout 由独立线程排空（丢弃内容、`trace` 记录），等待线程
//! 轮询退出状态并对照墙钟预算；超时即强制终止并回收。
//! 核心不出现任何平台相关命令。

use crate::error::{SimError, SimResult};
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{trace, warn};

/// 轮询退出状态的间隔
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// 限时等待的结局
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitOutcome {
    /// 正常退出，携带状态码（无法取得时为 `None`）
    Exited(Option<i32>),
    /// 超出预算，子进程已被强制终止
    TimedOut,
}

/// 子进程句柄
///
/// 创建即开始排空 stdout，防止子进程因管道写满而停滞。
pub struct ProcessHandle {
    child: Child,
    drain: Option<JoinHandle<()>>,
}

impl ProcessHandle {
    /// 以给定工作目录启动子进程
    pub fn spawn(
        exec: &Path,
        args: &[&str],
        working_dir: &Path,
    ) -> SimResult<Self> {
        let mut child = Command::new(exec)
            .args(args)
            .current_dir(working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| SimError::Spawn(format!("{}: {e}", exec.display())))?;

        let drain = child.stdout.take().map(|stdout| {
            std::thread::spawn(move || {
                let reader = BufReader::new(stdout);
                for line in reader.lines() {
                    match line {
                        Ok(text) => trace!("simulator: {text}"),
                        Err(_) => break,
                    }
                }
            })
        });

        Ok(Self { child, drain })
    }

    /// 等待退出，超出预算则终止子进程
    ///
    /// 返回前保证 stdout 排空线程已结束。
    pub fn wait_with_timeout(mut self, budget: Duration) -> SimResult<ExitOutcome> {
        let deadline = Instant::now() + budget;
        loop {
            if let Some(status) = self.child.try_wait()? {
                self.join_drain();
                return Ok(ExitOutcome::Exited(status.code()));
            }
            if Instant::now() >= deadline {
                self.kill();
                self.join_drain();
                return Ok(ExitOutcome::TimedOut);
            }
            std::thread::sleep(POLL_INTERVAL);
        }
    }

    /// 强制终止并回收子进程
    pub fn kill(&mut self) {
        if let Err(err) = self.child.kill() {
            // 子进程可能已经自行退出
            trace!("kill: {err}");
        }
        if let Err(err) = self.child.wait() {
            warn!("could not reap simulator process: {err}");
        }
    }

    fn join_drain(&mut self) {
        if let Some(handle) = self.drain.take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn shell() -> PathBuf {
        PathBuf::from("/bin/sh")
    }

    #[test]
    fn test_exit_code_captured() {
        let dir = tempfile::tempdir().unwrap();
        let handle =
            ProcessHandle::spawn(&shell(), &["-c", "exit 3"], dir.path()).unwrap();
        let outcome = handle.wait_with_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(outcome, ExitOutcome::Exited(Some(3)));
    }

    #[test]
    fn test_stdout_drained_to_completion() {
        let dir = tempfile::tempdir().unwrap();
        let handle = ProcessHandle::spawn(
            &shell(),
            &["-c", "seq 1 5000; exit 0"],
            dir.path(),
        )
        .unwrap();
        let outcome = handle.wait_with_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(outcome, ExitOutcome::Exited(Some(0)));
    }

    #[test]
    fn test_timeout_kills_child() {
        let dir = tempfile::tempdir().unwrap();
        let handle =
            ProcessHandle::spawn(&shell(), &["-c", "sleep 10"], dir.path()).unwrap();
        let started = Instant::now();
        let outcome = handle.wait_with_timeout(Duration::from_millis(100)).unwrap();
        assert_eq!(outcome, ExitOutcome::TimedOut);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_missing_executable_is_spawn_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = ProcessHandle::spawn(
            Path::new("/definitely/not/a/simulator"),
            &[],
            dir.path(),
        );
        assert!(matches!(result, Err(SimError::Spawn(_))));
    }
}

use crate::errors::{Error, Result};
use crate::types::CommandArguments;
use std::process::Output;

/// Trait for executing external commands.
///
/// This abstraction allows for testing without mocking by providing
/// different implementations for production and test environments. The
/// wrapper is synchronous by design: a compile either finishes or fails,
/// and nothing else happens meanwhile.
pub trait CommandExecutor {
    /// Execute a command with the given arguments, capturing its output
    fn execute(&self, cmd: &str, args: &CommandArguments) -> Result<Output> {
        self.execute_scrubbed(cmd, args, &[])
    }

    /// Execute a command with the named variables removed from the child's
    /// environment
    fn execute_scrubbed(
        &self,
        cmd: &str,
        args: &CommandArguments,
        scrub_env: &[&str],
    ) -> Result<Output>;
}

/// Production implementation that executes real commands
pub struct SystemCommandExecutor;

impl CommandExecutor for SystemCommandExecutor {
    fn execute_scrubbed(
        &self,
        cmd: &str,
        args: &CommandArguments,
        scrub_env: &[&str],
    ) -> Result<Output> {
        let mut command = std::process::Command::new(cmd);
        command.args(args.as_slice());
        for variable in scrub_env {
            command.env_remove(variable);
        }
        command.output().map_err(|e| {
            Error::command_execution(
                cmd,
                args.clone().into_inner(),
                format!("failed to execute command: {e}"),
                None,
            )
        })
    }
}

/// Test implementation that simulates command execution.
///
/// Canned responses are matched on the full command line; a handler can be
/// installed instead when the fake needs to produce side effects (such as a
/// compiler writing report files) or inspect the arguments it was called
/// with.
#[cfg(test)]
pub struct TestCommandExecutor {
    responses: std::sync::Mutex<std::collections::HashMap<String, TestResponse>>,
    #[allow(clippy::type_complexity)]
    handler: Option<Box<dyn Fn(&str, &[String]) -> Result<TestResponse>>>,
    calls: std::sync::Mutex<Vec<Vec<String>>>,
}

#[cfg(test)]
#[derive(Clone, Default)]
pub struct TestResponse {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub status_code: i32,
}

#[cfg(test)]
impl TestCommandExecutor {
    pub fn new() -> Self {
        Self {
            responses: std::sync::Mutex::new(std::collections::HashMap::new()),
            handler: None,
            calls: std::sync::Mutex::new(Vec::new()),
        }
    }

    pub fn with_handler(
        handler: impl Fn(&str, &[String]) -> Result<TestResponse> + 'static,
    ) -> Self {
        Self {
            responses: std::sync::Mutex::new(std::collections::HashMap::new()),
            handler: Some(Box::new(handler)),
            calls: std::sync::Mutex::new(Vec::new()),
        }
    }

    pub fn add_response(&self, cmd: &str, args: &[String], response: TestResponse) {
        let key = format!("{} {}", cmd, args.join(" "));
        let mut responses = self.responses.lock().unwrap();
        responses.insert(key, response);
    }

    pub fn add_simple_response(&self, cmd: &str, args: &[String], stdout: &str) {
        self.add_response(
            cmd,
            args,
            TestResponse {
                stdout: stdout.as_bytes().to_vec(),
                stderr: Vec::new(),
                status_code: 0,
            },
        );
    }

    /// Argument vectors of every execution, in order
    pub fn calls(&self) -> Vec<Vec<String>> {
        self.calls.lock().unwrap().clone()
    }
}

#[cfg(test)]
impl CommandExecutor for TestCommandExecutor {
    fn execute_scrubbed(
        &self,
        cmd: &str,
        args: &CommandArguments,
        _scrub_env: &[&str],
    ) -> Result<Output> {
        self.calls.lock().unwrap().push(args.as_slice().to_vec());

        let response = if let Some(handler) = &self.handler {
            handler(cmd, args.as_slice())?
        } else {
            let key = format!("{} {}", cmd, args.join(" "));
            let responses = self.responses.lock().unwrap();
            responses
                .get(&key)
                .cloned()
                .ok_or_else(|| {
                    Error::configuration(format!(
                        "no test response configured for command: {key}"
                    ))
                })?
        };

        Ok(Output {
            status: exit_status::from_raw(response.status_code),
            stdout: response.stdout,
            stderr: response.stderr,
        })
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canned_response() {
        let executor = TestCommandExecutor::new();
        executor.add_simple_response("echo", &["hello".to_string()], "hello\n");

        let args = CommandArguments::from_vec(vec!["hello".to_string()]);
        let output = executor.execute("echo", &args).unwrap();
        assert_eq!(String::from_utf8_lossy(&output.stdout), "hello\n");
        assert!(output.status.success());
    }

    #[test]
    fn test_error_status_response() {
        let executor = TestCommandExecutor::new();
        executor.add_response(
            "cl",
            &[],
            TestResponse {
                stdout: Vec::new(),
                stderr: b"fatal error C1083".to_vec(),
                status_code: 2,
            },
        );

        let output = executor.execute("cl", &CommandArguments::new()).unwrap();
        assert!(!output.status.success());
        assert_eq!(output.status.code(), Some(2));
        assert_eq!(String::from_utf8_lossy(&output.stderr), "fatal error C1083");
    }

    #[test]
    fn test_missing_response_is_error() {
        let executor = TestCommandExecutor::new();
        let args = CommandArguments::from_vec(vec!["x".to_string()]);
        let result = executor.execute("unknown", &args);
        assert!(result.is_err());
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("no test response configured"));
    }

    #[test]
    fn test_handler_sees_arguments() {
        let executor = TestCommandExecutor::with_handler(|cmd, args| {
            assert_eq!(cmd, "cl");
            assert_eq!(args, ["/c", "foo.cpp"]);
            Ok(TestResponse::default())
        });
        let args = CommandArguments::from(&["/c", "foo.cpp"][..]);
        let output = executor.execute("cl", &args).unwrap();
        assert!(output.status.success());
        assert_eq!(executor.calls().len(), 1);
    }

    #[test]
    fn test_system_executor_runs_real_process() {
        // `true` exists on any unix host the tests run on
        #[cfg(unix)]
        {
            let executor = SystemCommandExecutor;
            let output = executor.execute("true", &CommandArguments::new()).unwrap();
            assert!(output.status.success());
        }
    }
}

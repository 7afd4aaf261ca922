//! Interactive login protocol
//!
//! `BaiduPCS-Go login -username <u> -password <p>` asks follow-up questions
//! (captcha, verification channel, verification code) on stdout and reads
//! the answers from stdin. Every question ends with [`PROMPT_SENTINEL`], so
//! one round-trip is: read through the sentinel (or to exit), classify the
//! text, hand a [`LoginStep`] to the caller, write the caller's answer.

use super::first_capture;
use crate::error::{Error, ProcessError, ProtocolError, Result};
use crate::process::Process;
use crate::types::{LoginStep, VerifyChannel};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Printed by the login program after every prompt
pub const PROMPT_SENTINEL: &str = "|| PROMPT END ||";

const LOGIN_SUCCEEDED: &str = "百度帐号登录成功";
const VERIFY_CHANNEL_PROMPT: &str = "请输入验证方式 (1 或 2) > ";
const VERIFY_CODE_PROMPT: &str = "请输入接收到的验证码 > ";
const CAPTCHA_PROMPT: &str = "请输入验证码 > ";

const PHONE_PATTERN: &str = r"1: 手机: (.*)\n";
const EMAIL_PATTERN: &str = r"2: 邮箱: (.*)\n";
const CAPTCHA_PATH_PATTERN: &str = r"打开以下路径, 以查看验证码\n(.*)\n";
const CAPTCHA_URL_PATTERN: &str = r"或者打开以下的网址, 以查看验证码\n(.*)\n";

/// Classify the text read for one login round-trip
///
/// `exited` must reflect whether the login program had terminated when the
/// read returned; in that case `text` is everything it printed last and the
/// outcome is decided by the success phrase alone.
pub fn classify_prompt(text: &str, exited: bool) -> Result<LoginStep> {
    if exited {
        return Ok(if text.contains(LOGIN_SUCCEEDED) {
            LoginStep::Success
        } else {
            LoginStep::Failed
        });
    }

    if text.contains(VERIFY_CHANNEL_PROMPT) {
        return Ok(LoginStep::AwaitVerificationChannelChoice {
            phone: first_capture(PHONE_PATTERN, text).unwrap_or_default(),
            email: first_capture(EMAIL_PATTERN, text).unwrap_or_default(),
        });
    }

    if text.contains(VERIFY_CODE_PROMPT) {
        return Ok(LoginStep::AwaitVerificationCode);
    }

    if text.contains(CAPTCHA_PROMPT) {
        return Ok(LoginStep::AwaitCaptcha {
            local_image_path: first_capture(CAPTCHA_PATH_PATTERN, text).unwrap_or_default(),
            remote_image_url: first_capture(CAPTCHA_URL_PATTERN, text).unwrap_or_default(),
        });
    }

    Err(ProtocolError::UnrecognizedPrompt {
        text: text.to_string(),
    }
    .into())
}

/// One login attempt against the wrapped program
///
/// A session has no subprocess until [`LoginSession::send_credentials`];
/// until then [`LoginSession::next_step`] yields
/// [`LoginStep::AwaitCredentials`] and every `send_*` fails with
/// not-started.
#[derive(Debug)]
pub struct LoginSession {
    binary_path: PathBuf,
    step_timeout: Option<Duration>,
    process: Option<Process>,
}

impl LoginSession {
    /// Create a session that will launch `binary_path`
    pub fn new(binary_path: impl Into<PathBuf>) -> Self {
        Self {
            binary_path: binary_path.into(),
            step_timeout: None,
            process: None,
        }
    }

    /// Bound each prompt read by `timeout`
    pub fn with_step_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.step_timeout = timeout;
        self
    }

    /// True once the login program has been launched
    pub fn is_started(&self) -> bool {
        self.process.is_some()
    }

    /// Read and classify the next prompt
    pub async fn next_step(&mut self) -> Result<LoginStep> {
        let Some(process) = &self.process else {
            return Ok(LoginStep::AwaitCredentials);
        };

        let text = process
            .read_until_timeout(PROMPT_SENTINEL, true, self.step_timeout)
            .await?
            .ok_or_else(|| ProtocolError::PromptTimedOut {
                seconds: self.step_timeout.map_or(0, |t| t.as_secs()),
            })?;

        let step = classify_prompt(&text, process.exited())?;
        debug!(?step, "login step");
        Ok(step)
    }

    /// Launch the login program with the given credentials
    ///
    /// A program left over from an earlier attempt is killed first.
    pub async fn send_credentials(&mut self, username: &str, password: &str) -> Result<()> {
        if let Some(previous) = self.process.take()
            && let Err(e) = previous.kill().await
        {
            debug!(error = %e, "previous login process already gone");
        }

        let mut process = Process::new(
            &self.binary_path,
            ["login", "-username", username, "-password", password],
        );
        process.on_stdout(|chunk| debug!(output = chunk, "login output"));
        process.start()?;
        info!(user = username, "login started");

        self.process = Some(process);
        Ok(())
    }

    fn process(&self) -> Result<&Process> {
        self.process
            .as_ref()
            .ok_or(Error::Process(ProcessError::NotStarted))
    }

    /// Write one newline-terminated answer
    pub async fn send(&self, input: &str) -> Result<()> {
        let process = self.process()?;
        if input.ends_with('\n') {
            process.write(input).await
        } else {
            process.write(&format!("{input}\n")).await
        }
    }

    /// Answer the verification channel question
    pub async fn send_verify_channel(&self, channel: VerifyChannel) -> Result<()> {
        self.send(channel.as_choice()).await
    }

    /// Answer the verification code question
    pub async fn send_verify_code(&self, code: &str) -> Result<()> {
        self.send(code).await
    }

    /// Answer the captcha question
    pub async fn send_captcha(&self, captcha: &str) -> Result<()> {
        self.send(captcha).await
    }

    /// Terminate the login program
    pub async fn kill(&self) -> Result<()> {
        self.process()?.kill().await
    }
}

/// An answer supplied by the user for the current step
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LoginInput {
    /// User name and password
    Credentials {
        /// Account name
        username: String,
        /// Account password
        password: String,
    },
    /// Text read from the captcha image
    Captcha(String),
    /// Chosen verification channel
    VerifyChannel(VerifyChannel),
    /// Code received over the chosen channel
    VerifyCode(String),
}

/// Login driver with reset-on-error recovery
///
/// Any error during a round-trip (unrecognized prompt, dead process, write
/// failure) discards the session, resets to [`LoginStep::AwaitCredentials`]
/// and reports [`LoginStep::Failed`]. The cause is logged, never returned.
#[derive(Debug)]
pub struct LoginFlow {
    binary_path: PathBuf,
    step_timeout: Option<Duration>,
    session: LoginSession,
    step: LoginStep,
}

impl LoginFlow {
    /// Create a flow that launches `binary_path` for each attempt
    pub fn new(binary_path: impl Into<PathBuf>, step_timeout: Option<Duration>) -> Self {
        let binary_path = binary_path.into();
        Self {
            session: LoginSession::new(&binary_path).with_step_timeout(step_timeout),
            binary_path,
            step_timeout,
            step: LoginStep::AwaitCredentials,
        }
    }

    /// The step the flow is waiting on
    pub fn step(&self) -> &LoginStep {
        &self.step
    }

    /// Supply `input` for the current step and advance to the next one
    pub async fn submit(&mut self, input: LoginInput) -> LoginStep {
        match self.advance(input).await {
            Ok(LoginStep::Failed) => {
                info!("login rejected");
                self.reset().await;
                LoginStep::Failed
            }
            Ok(step) => {
                if step == LoginStep::Success {
                    info!("login succeeded");
                }
                self.step = step.clone();
                step
            }
            Err(e) => {
                warn!(error = %e, "login step failed, restarting login");
                self.reset().await;
                LoginStep::Failed
            }
        }
    }

    async fn advance(&mut self, input: LoginInput) -> Result<LoginStep> {
        match input {
            LoginInput::Credentials { username, password } => {
                self.session.send_credentials(&username, &password).await?
            }
            LoginInput::Captcha(text) => self.session.send_captcha(&text).await?,
            LoginInput::VerifyChannel(channel) => self.session.send_verify_channel(channel).await?,
            LoginInput::VerifyCode(code) => self.session.send_verify_code(&code).await?,
        }
        self.session.next_step().await
    }

    /// Kill any running attempt and start over
    pub async fn reset(&mut self) {
        if self.session.is_started()
            && let Err(e) = self.session.kill().await
        {
            debug!(error = %e, "login process already gone");
        }
        self.session = LoginSession::new(&self.binary_path).with_step_timeout(self.step_timeout);
        self.step = LoginStep::AwaitCredentials;
    }

    /// Start an attempt with user name and password
    pub async fn submit_credentials(&mut self, username: &str, password: &str) -> LoginStep {
        self.submit(LoginInput::Credentials {
            username: username.to_string(),
            password: password.to_string(),
        })
        .await
    }

    /// Answer a captcha prompt
    pub async fn submit_captcha(&mut self, captcha: &str) -> LoginStep {
        self.submit(LoginInput::Captcha(captcha.to_string())).await
    }

    /// Choose a verification channel
    pub async fn submit_verify_channel(&mut self, channel: VerifyChannel) -> LoginStep {
        self.submit(LoginInput::VerifyChannel(channel)).await
    }

    /// Enter the verification code
    pub async fn submit_verify_code(&mut self, code: &str) -> LoginStep {
        self.submit(LoginInput::VerifyCode(code.to_string())).await
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    const CHANNEL_PROMPT: &str = "\n需要验证手机或邮箱才能登录\n选择一种验证方式\n1: 手机: 1234\n2: 邮箱: a@b.com\n消息: ok\n\n请输入验证方式 (1 或 2) > || PROMPT END ||";

    #[test]
    fn classifies_verification_channel_prompt() {
        let step = classify_prompt(CHANNEL_PROMPT, false).unwrap();
        assert_eq!(
            step,
            LoginStep::AwaitVerificationChannelChoice {
                phone: "1234".to_string(),
                email: "a@b.com".to_string(),
            }
        );
    }

    #[test]
    fn classifies_verification_code_prompt() {
        let step = classify_prompt("请输入接收到的验证码 > || PROMPT END ||", false).unwrap();
        assert_eq!(step, LoginStep::AwaitVerificationCode);
    }

    #[test]
    fn classifies_captcha_prompt_with_locations() {
        let text = "打开以下路径, 以查看验证码\n/tmp/captcha.png\n\n或者打开以下的网址, 以查看验证码\nhttps://pan.example/cap?id=1\n\n请输入验证码 > || PROMPT END ||";

        let step = classify_prompt(text, false).unwrap();

        assert_eq!(
            step,
            LoginStep::AwaitCaptcha {
                local_image_path: "/tmp/captcha.png".to_string(),
                remote_image_url: "https://pan.example/cap?id=1".to_string(),
            }
        );
    }

    #[test]
    fn exited_output_decides_success_by_phrase() {
        assert_eq!(
            classify_prompt("百度帐号登录成功: tester\n", true).unwrap(),
            LoginStep::Success
        );
        assert_eq!(
            classify_prompt("密码错误\n", true).unwrap(),
            LoginStep::Failed
        );
        // exit wins over any prompt marker still in the text
        assert_eq!(
            classify_prompt(CHANNEL_PROMPT, true).unwrap(),
            LoginStep::Failed
        );
    }

    #[test]
    fn unknown_prompt_is_a_hard_error() {
        let err = classify_prompt("请输入二级密码 > || PROMPT END ||", false).unwrap_err();
        assert!(
            matches!(
                err,
                Error::Protocol(ProtocolError::UnrecognizedPrompt { ref text }) if text.contains("二级密码")
            ),
            "got {err:?}"
        );
    }

    #[tokio::test]
    async fn session_without_process_awaits_credentials() {
        let mut session = LoginSession::new("/nonexistent/BaiduPCS-Go");

        assert_eq!(session.next_step().await.unwrap(), LoginStep::AwaitCredentials);
        assert!(session.send_captcha("abcd").await.unwrap_err().is_not_started());
        assert!(session.kill().await.unwrap_err().is_not_started());
    }

    #[cfg(unix)]
    mod scripted {
        use super::*;
        use crate::test_helpers::write_script;

        const FAKE_LOGIN: &str = r#"#!/bin/sh
[ "$1" = "login" ] || exit 2
printf '\n需要验证手机或邮箱才能登录\n选择一种验证方式\n1: 手机: 1234\n2: 邮箱: a@b.com\n消息: ok\n\n请输入验证方式 (1 或 2) > || PROMPT END ||\n'
read choice
[ "$choice" = "2" ] || { printf 'bad choice %s\n' "$choice"; exit 1; }
printf '请输入接收到的验证码 > || PROMPT END ||\n'
read code
if [ "$code" = "000000" ]; then
  printf '百度帐号登录成功: %s\n' "$3"
else
  printf '验证码错误\n'
fi
"#;

        #[tokio::test]
        async fn session_walks_channel_code_success() {
            let dir = tempfile::tempdir().unwrap();
            let exe = write_script(dir.path(), "fake-pcs", FAKE_LOGIN);
            let mut session = LoginSession::new(&exe);

            session.send_credentials("tester", "secret").await.unwrap();
            let step = session.next_step().await.unwrap();
            assert_eq!(
                step,
                LoginStep::AwaitVerificationChannelChoice {
                    phone: "1234".to_string(),
                    email: "a@b.com".to_string(),
                }
            );

            session.send_verify_channel(VerifyChannel::Email).await.unwrap();
            assert_eq!(
                session.next_step().await.unwrap(),
                LoginStep::AwaitVerificationCode
            );

            session.send_verify_code("000000").await.unwrap();
            assert_eq!(session.next_step().await.unwrap(), LoginStep::Success);
        }

        #[tokio::test]
        async fn flow_reports_failure_and_resets() {
            let dir = tempfile::tempdir().unwrap();
            let exe = write_script(dir.path(), "fake-pcs", FAKE_LOGIN);
            let mut flow = LoginFlow::new(&exe, Some(Duration::from_secs(5)));

            let step = flow.submit_credentials("tester", "secret").await;
            assert!(matches!(
                step,
                LoginStep::AwaitVerificationChannelChoice { .. }
            ));

            flow.submit_verify_channel(VerifyChannel::Email).await;
            let step = flow.submit_verify_code("999999").await;

            assert_eq!(step, LoginStep::Failed);
            assert_eq!(flow.step(), &LoginStep::AwaitCredentials);
        }

        #[tokio::test]
        async fn flow_hides_unrecognized_prompt_behind_failed() {
            let dir = tempfile::tempdir().unwrap();
            let exe = write_script(
                dir.path(),
                "fake-pcs",
                "#!/bin/sh\nprintf '请输入二级密码 > || PROMPT END ||\\n'\nexec sleep 30\n",
            );
            let mut flow = LoginFlow::new(&exe, Some(Duration::from_secs(5)));

            let step = flow.submit_credentials("tester", "secret").await;

            assert_eq!(step, LoginStep::Failed);
            assert_eq!(flow.step(), &LoginStep::AwaitCredentials);
        }

        #[tokio::test]
        async fn flow_success_is_sticky() {
            let dir = tempfile::tempdir().unwrap();
            let exe = write_script(dir.path(), "fake-pcs", FAKE_LOGIN);
            let mut flow = LoginFlow::new(&exe, None);

            flow.submit_credentials("tester", "secret").await;
            flow.submit_verify_channel(VerifyChannel::Email).await;
            let step = flow.submit_verify_code("000000").await;

            assert_eq!(step, LoginStep::Success);
            assert_eq!(flow.step(), &LoginStep::Success);
        }
    }
}

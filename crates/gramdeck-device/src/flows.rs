//! Instagram flows — turn a scheduled task into taps, swipes and text input.
//!
//! Every flow starts the same way: resolve the device, make sure it is
//! reachable, wake and unlock the screen, launch the app. Then it optionally
//! switches account, finds its target through the search UI, and issues the
//! gesture sequence for its task type. Steps are separated by a random pause
//! taken from [`PacingConfig`], and every pause ends early when the task is
//! cancelled.

use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use tokio_util::sync::CancellationToken;

use gramdeck_core::config::{DeviceConfig, PacingConfig, Point, ScreenLayout};
use gramdeck_core::error::{GramdeckError, Result};
use gramdeck_scheduler::{Target, Task, TaskAction, TaskHandler};

use crate::bridge::{DeviceBridge, KeyCode};

const UNLOCK_SWIPE: Duration = Duration::from_millis(300);

/// [`TaskHandler`] that performs every task kind on a device through `B`.
pub struct InstagramFlows<B> {
    bridge: B,
    config: DeviceConfig,
}

impl<B: DeviceBridge> InstagramFlows<B> {
    pub fn new(bridge: B, config: DeviceConfig) -> Self {
        Self { bridge, config }
    }

    pub fn bridge(&self) -> &B {
        &self.bridge
    }

    /// The task's own device wins over the configured default.
    fn resolve_device<'a>(&'a self, task: &'a Task) -> Result<&'a str> {
        task.device_id
            .as_deref()
            .or(self.config.default_device.as_deref())
            .ok_or_else(|| {
                GramdeckError::DeviceNotConnected(format!(
                    "no device for task '{}' and no default_device configured",
                    task.name
                ))
            })
    }

    fn account_index(&self, account: &str) -> Result<usize> {
        let wanted = account.trim_start_matches('@');
        self.config
            .accounts
            .iter()
            .position(|a| a.trim_start_matches('@') == wanted)
            .ok_or_else(|| GramdeckError::Device(format!("account '{account}' is not configured")))
    }
}

/// One flow run against one device.
struct Session<'a, B> {
    bridge: &'a B,
    serial: &'a str,
    layout: &'a ScreenLayout,
    pacing: &'a PacingConfig,
    cancel: &'a CancellationToken,
}

impl<B: DeviceBridge> Session<'_, B> {
    fn ensure_live(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            Err(GramdeckError::Cancelled)
        } else {
            Ok(())
        }
    }

    async fn tap(&self, at: Point, what: &str) -> Result<()> {
        self.ensure_live()?;
        self.bridge.tap(self.serial, at).await?.check(what)?;
        Ok(())
    }

    async fn type_text(&self, text: &str, what: &str) -> Result<()> {
        self.ensure_live()?;
        self.bridge.type_text(self.serial, text).await?.check(what)?;
        Ok(())
    }

    async fn key(&self, key: KeyCode) -> Result<()> {
        self.ensure_live()?;
        self.bridge
            .key_event(self.serial, key)
            .await?
            .check(&format!("key {}", key.code()))?;
        Ok(())
    }

    /// Sleep a random human-ish interval, or bail out on cancellation.
    async fn pace(&self) -> Result<()> {
        let ms = jitter(self.pacing.min_delay_ms, self.pacing.max_delay_ms);
        self.hold(Duration::from_millis(ms)).await
    }

    async fn hold(&self, duration: Duration) -> Result<()> {
        self.ensure_live()?;
        if duration.is_zero() {
            return Ok(());
        }
        tokio::select! {
            _ = tokio::time::sleep(duration) => Ok(()),
            _ = self.cancel.cancelled() => Err(GramdeckError::Cancelled),
        }
    }

    async fn prepare(&self, package: &str) -> Result<()> {
        self.key(KeyCode::Wakeup).await?;
        self.ensure_live()?;
        self.bridge
            .swipe(
                self.serial,
                self.layout.unlock_swipe_from,
                self.layout.unlock_swipe_to,
                UNLOCK_SWIPE,
            )
            .await?
            .check("unlock swipe")?;
        self.ensure_live()?;
        self.bridge
            .launch_app(self.serial, package)
            .await?
            .check(&format!("launch {package}"))?;
        self.pace().await
    }

    async fn switch_account(&self, index: usize) -> Result<()> {
        self.tap(self.layout.profile_tab, "profile tab").await?;
        self.pace().await?;
        self.tap(self.layout.account_switcher, "account switcher").await?;
        self.pace().await?;
        let first = self.layout.account_row_first;
        let offset = u32::try_from(index)
            .unwrap_or(u32::MAX)
            .saturating_mul(self.layout.account_row_height);
        let row = Point::new(first.x, first.y.saturating_add(offset));
        self.tap(row, "account row").await?;
        self.pace().await
    }

    /// Search for `query` and open the first result.
    async fn search(&self, query: &str) -> Result<()> {
        self.tap(self.layout.search_tab, "search tab").await?;
        self.pace().await?;
        self.tap(self.layout.search_bar, "search bar").await?;
        self.type_text(query, "search query").await?;
        self.pace().await?;
        self.tap(self.layout.first_search_result, "first search result").await?;
        self.pace().await
    }

    async fn open_profile(&self, username: &str) -> Result<()> {
        self.search(username.trim_start_matches('@')).await
    }

    /// Open the post a like or comment lands on.
    async fn open_post(&self, target: &Target) -> Result<()> {
        self.search(&target.search_query()).await?;
        self.tap(self.layout.first_grid_post, "first post").await?;
        self.pace().await
    }

    async fn like(&self, target: &Target) -> Result<()> {
        self.open_post(target).await?;
        self.tap(self.layout.like_button, "like button").await
    }

    async fn comment(&self, target: &Target, text: &str) -> Result<()> {
        self.open_post(target).await?;
        self.tap(self.layout.comment_button, "comment button").await?;
        self.pace().await?;
        self.tap(self.layout.comment_field, "comment field").await?;
        self.type_text(text, "comment text").await?;
        self.pace().await?;
        self.tap(self.layout.comment_post, "post comment").await
    }

    async fn follow(&self, username: &str) -> Result<()> {
        self.open_profile(username).await?;
        self.tap(self.layout.follow_button, "follow button").await
    }

    async fn direct_message(&self, username: &str, message: &str) -> Result<()> {
        self.open_profile(username).await?;
        self.tap(self.layout.message_button, "message button").await?;
        self.pace().await?;
        self.tap(self.layout.message_field, "message field").await?;
        self.type_text(message, "message text").await?;
        self.pace().await?;
        self.tap(self.layout.message_send, "send message").await
    }

    async fn story_view(&self, username: Option<&str>) -> Result<()> {
        match username {
            Some(username) => {
                self.open_profile(username).await?;
                self.tap(self.layout.profile_avatar, "profile story").await?;
            }
            None => {
                self.tap(self.layout.home_tab, "home tab").await?;
                self.pace().await?;
                self.tap(self.layout.story_tray_first, "story tray").await?;
            }
        }
        self.hold(Duration::from_millis(self.pacing.story_view_ms)).await?;
        self.key(KeyCode::Back).await
    }
}

fn jitter(min_ms: u64, max_ms: u64) -> u64 {
    if max_ms > min_ms {
        rand::thread_rng().gen_range(min_ms..=max_ms)
    } else {
        min_ms
    }
}

#[async_trait]
impl<B: DeviceBridge> TaskHandler for InstagramFlows<B> {
    async fn execute(&self, task: &Task, cancel: CancellationToken) -> Result<()> {
        if let TaskAction::Post { caption } = &task.action {
            tracing::debug!(
                "📝 Post task '{}' has no device flow (caption: {:?})",
                task.name,
                caption
            );
            return Ok(());
        }

        let serial = self.resolve_device(task)?;
        if !self.bridge.is_connected(serial).await? {
            self.bridge.connect(serial).await?.check(&format!("connect {serial}"))?;
        }

        let session = Session {
            bridge: &self.bridge,
            serial,
            layout: &self.config.layout,
            pacing: &self.config.pacing,
            cancel: &cancel,
        };
        tracing::debug!("📱 [{}] {} on {}", self.bridge.name(), task.name, serial);
        session.prepare(&self.config.package).await?;

        match &task.action {
            TaskAction::Like { target, account } => {
                if let Some(account) = account {
                    let index = self.account_index(account)?;
                    session.switch_account(index).await?;
                }
                session.like(target).await
            }
            TaskAction::Comment { target, text } => session.comment(target, text).await,
            TaskAction::Follow { username } => session.follow(username).await,
            TaskAction::Dm { username, message } => {
                session.direct_message(username, message).await
            }
            TaskAction::StoryView { username } => session.story_view(username.as_deref()).await,
            TaskAction::Post { .. } => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    use crate::bridge::{CommandOutput, DeviceInfo};
    use gramdeck_scheduler::TaskSpec;

    /// Records every call as a short line; fails calls starting with `fail_on`.
    #[derive(Clone, Default)]
    struct RecordingBridge {
        calls: Arc<Mutex<Vec<String>>>,
        attached: Vec<String>,
        fail_on: Option<String>,
    }

    impl RecordingBridge {
        fn attached(serials: &[&str]) -> Self {
            Self {
                attached: serials.iter().map(|s| s.to_string()).collect(),
                ..Default::default()
            }
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        fn record(&self, call: String) -> Result<CommandOutput> {
            let fail = self.fail_on.as_ref().is_some_and(|p| call.starts_with(p.as_str()));
            self.calls.lock().unwrap().push(call);
            Ok(if fail {
                CommandOutput::failed("device offline")
            } else {
                CommandOutput::ok("")
            })
        }
    }

    #[async_trait]
    impl DeviceBridge for RecordingBridge {
        fn name(&self) -> &str {
            "recording"
        }

        async fn list_devices(&self) -> Result<Vec<DeviceInfo>> {
            Ok(self
                .attached
                .iter()
                .map(|s| DeviceInfo {
                    serial: s.clone(),
                    state: "device".into(),
                })
                .collect())
        }

        async fn connect(&self, serial: &str) -> Result<CommandOutput> {
            self.record(format!("connect {serial}"))?;
            Err(GramdeckError::DeviceNotConnected(serial.to_string()))
        }

        async fn disconnect(&self, serial: &str) -> Result<CommandOutput> {
            self.record(format!("disconnect {serial}"))
        }

        async fn tap(&self, serial: &str, at: Point) -> Result<CommandOutput> {
            self.record(format!("{serial} tap {},{}", at.x, at.y))
        }

        async fn swipe(
            &self,
            serial: &str,
            from: Point,
            to: Point,
            _duration: Duration,
        ) -> Result<CommandOutput> {
            self.record(format!("{serial} swipe {},{} {},{}", from.x, from.y, to.x, to.y))
        }

        async fn type_text(&self, serial: &str, text: &str) -> Result<CommandOutput> {
            self.record(format!("{serial} text {text}"))
        }

        async fn key_event(&self, serial: &str, key: KeyCode) -> Result<CommandOutput> {
            self.record(format!("{serial} key {}", key.code()))
        }

        async fn launch_app(&self, serial: &str, package: &str) -> Result<CommandOutput> {
            self.record(format!("{serial} launch {package}"))
        }

        async fn open_uri(&self, serial: &str, uri: &str) -> Result<CommandOutput> {
            self.record(format!("{serial} open {uri}"))
        }

        async fn screenshot(&self, _serial: &str) -> Result<Vec<u8>> {
            Ok(Vec::new())
        }
    }

    fn instant_config() -> DeviceConfig {
        DeviceConfig {
            default_device: Some("emu".into()),
            accounts: vec!["main".into(), "brand".into()],
            pacing: PacingConfig {
                min_delay_ms: 0,
                max_delay_ms: 0,
                story_view_ms: 0,
            },
            ..Default::default()
        }
    }

    fn flows(bridge: RecordingBridge) -> InstagramFlows<RecordingBridge> {
        InstagramFlows::new(bridge, instant_config())
    }

    fn task(spec: TaskSpec) -> Task {
        Task {
            id: "t-1".into(),
            name: spec.name,
            action: spec.action,
            status: gramdeck_scheduler::TaskStatus::Running,
            scheduled_time: spec.scheduled_time,
            executed_time: None,
            retry_count: 0,
            max_retries: spec.max_retries,
            priority: spec.priority,
            device_id: spec.device_id,
            created_at: spec.scheduled_time,
            last_error: None,
        }
    }

    fn tap(p: Point) -> String {
        format!("emu tap {},{}", p.x, p.y)
    }

    #[test]
    fn test_jitter_bounds() {
        assert_eq!(jitter(500, 500), 500);
        assert_eq!(jitter(900, 100), 900);
        for _ in 0..100 {
            let ms = jitter(1_500, 4_000);
            assert!((1_500..=4_000).contains(&ms));
        }
    }

    #[tokio::test]
    async fn test_like_hashtag_sequence() {
        let flows = flows(RecordingBridge::attached(&["emu"]));
        let layout = ScreenLayout::default();
        let like = task(TaskSpec::new(
            "like",
            TaskAction::Like {
                target: Target::Hashtag("coffee".into()),
                account: None,
            },
        ));
        flows.execute(&like, CancellationToken::new()).await.unwrap();

        let calls = flows.bridge().calls();
        assert_eq!(calls[0], "emu key 224");
        assert!(calls[1].starts_with("emu swipe"));
        assert_eq!(calls[2], "emu launch com.instagram.android");
        assert!(calls.contains(&"emu text #coffee".to_string()));
        assert_eq!(calls[calls.len() - 2], tap(layout.first_grid_post));
        assert_eq!(calls.last().unwrap(), &tap(layout.like_button));
    }

    #[tokio::test]
    async fn test_like_switches_account_first() {
        let flows = flows(RecordingBridge::attached(&["emu"]));
        let layout = ScreenLayout::default();
        let like = task(TaskSpec::new(
            "like",
            TaskAction::Like {
                target: Target::User("kai".into()),
                account: Some("@brand".into()),
            },
        ));
        flows.execute(&like, CancellationToken::new()).await.unwrap();

        let calls = flows.bridge().calls();
        let row = Point::new(
            layout.account_row_first.x,
            layout.account_row_first.y + layout.account_row_height,
        );
        let row_at = calls.iter().position(|c| *c == tap(row)).unwrap();
        let search_at = calls.iter().position(|c| *c == tap(layout.search_tab)).unwrap();
        assert!(row_at < search_at);
        assert!(calls.contains(&"emu text kai".to_string()));
    }

    #[tokio::test]
    async fn test_unknown_account_is_rejected() {
        let flows = flows(RecordingBridge::attached(&["emu"]));
        let like = task(TaskSpec::new(
            "like",
            TaskAction::Like {
                target: Target::User("kai".into()),
                account: Some("stranger".into()),
            },
        ));
        let err = flows.execute(&like, CancellationToken::new()).await.unwrap_err();
        assert!(err.to_string().contains("'stranger' is not configured"));
    }

    #[tokio::test]
    async fn test_dm_ends_with_send() {
        let flows = flows(RecordingBridge::attached(&["emu"]));
        let layout = ScreenLayout::default();
        let dm = task(TaskSpec::new(
            "dm",
            TaskAction::Dm {
                username: "@kai".into(),
                message: "hey there".into(),
            },
        ));
        flows.execute(&dm, CancellationToken::new()).await.unwrap();

        let calls = flows.bridge().calls();
        assert!(calls.contains(&"emu text kai".to_string()));
        assert!(calls.contains(&"emu text hey there".to_string()));
        assert_eq!(calls.last().unwrap(), &tap(layout.message_send));
    }

    #[tokio::test]
    async fn test_story_view_backs_out() {
        let flows = flows(RecordingBridge::attached(&["emu"]));
        let layout = ScreenLayout::default();
        let story = task(TaskSpec::new(
            "story",
            TaskAction::StoryView { username: None },
        ));
        flows.execute(&story, CancellationToken::new()).await.unwrap();

        let calls = flows.bridge().calls();
        assert!(calls.contains(&tap(layout.story_tray_first)));
        assert_eq!(calls.last().unwrap(), "emu key 4");
    }

    #[tokio::test]
    async fn test_post_touches_nothing() {
        let flows = InstagramFlows::new(RecordingBridge::default(), DeviceConfig::default());
        let post = task(TaskSpec::new("post", TaskAction::Post { caption: None }));
        flows.execute(&post, CancellationToken::new()).await.unwrap();
        assert!(flows.bridge().calls().is_empty());
    }

    #[tokio::test]
    async fn test_device_resolution() {
        let no_default = InstagramFlows::new(
            RecordingBridge::attached(&["emu"]),
            DeviceConfig {
                default_device: None,
                ..instant_config()
            },
        );
        let follow = task(TaskSpec::new(
            "follow",
            TaskAction::Follow {
                username: "kai".into(),
            },
        ));
        let err = no_default
            .execute(&follow, CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, GramdeckError::DeviceNotConnected(_)));

        let flows = flows(RecordingBridge::attached(&["emu", "pixel"]));
        let pinned = task(
            TaskSpec::new(
                "follow",
                TaskAction::Follow {
                    username: "kai".into(),
                },
            )
            .device("pixel"),
        );
        flows.execute(&pinned, CancellationToken::new()).await.unwrap();
        assert!(flows.bridge().calls().iter().all(|c| c.starts_with("pixel ")));
    }

    #[tokio::test]
    async fn test_detached_device_fails() {
        let flows = flows(RecordingBridge::default());
        let follow = task(TaskSpec::new(
            "follow",
            TaskAction::Follow {
                username: "kai".into(),
            },
        ));
        let err = flows.execute(&follow, CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, GramdeckError::DeviceNotConnected(_)));
        assert_eq!(flows.bridge().calls(), vec!["connect emu".to_string()]);
    }

    #[tokio::test]
    async fn test_failed_command_aborts_flow() {
        let bridge = RecordingBridge {
            fail_on: Some("emu launch".into()),
            ..RecordingBridge::attached(&["emu"])
        };
        let flows = flows(bridge);
        let follow = task(TaskSpec::new(
            "follow",
            TaskAction::Follow {
                username: "kai".into(),
            },
        ));
        let err = flows.execute(&follow, CancellationToken::new()).await.unwrap_err();
        assert!(err.to_string().contains("launch com.instagram.android failed"));
        assert_eq!(flows.bridge().calls().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_interrupts_pacing() {
        let mut config = instant_config();
        config.pacing = PacingConfig {
            min_delay_ms: 60_000,
            max_delay_ms: 60_000,
            story_view_ms: 0,
        };
        let flows = Arc::new(InstagramFlows::new(RecordingBridge::attached(&["emu"]), config));
        let comment = task(TaskSpec::new(
            "comment",
            TaskAction::Comment {
                target: Target::Hashtag("coffee".into()),
                text: "nice".into(),
            },
        ));

        let cancel = CancellationToken::new();
        let run = {
            let flows = flows.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { flows.execute(&comment, cancel).await })
        };
        tokio::time::sleep(Duration::from_secs(1)).await;
        cancel.cancel();

        let err = run.await.unwrap().unwrap_err();
        assert!(matches!(err, GramdeckError::Cancelled));
        // Stopped in the pause after launching the app.
        assert_eq!(flows.bridge().calls().len(), 3);
    }
}

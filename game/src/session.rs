//! Session coordinator: starts or joins a session exactly once and spawns
//! player avatars on the authoritative peer
//!
//! The coordinator owns the transport for its process. A start request runs
//! through a fixed sequence:
//! - Reject if another start is pending or the runner is already running
//! - Resolve the target scene from the build list
//! - Create the runner and scene manager the first time they are needed
//! - Subscribe to lifecycle events once, then await the transport start
//!
//! Lifecycle events are drained with [`LobbyManager::pump_events`] from the
//! simulation thread, which is also the only place the spawn registry is
//! mutated.

use crate::config::GameConfig;
use crate::error::SessionError;
use crate::spawn_registry::{spawn_position, SpawnRegistry};
use crate::transport::{
    GameMode, RunnerFactory, SceneManager, SceneRef, SessionEvent, SessionTransport, SpawnRequest,
    StartGameArgs,
};
use log::{debug, error, info, warn};
use shared::PlayerRef;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use tokio::sync::{mpsc, Mutex};

/// Loading screen shown while a session is being established
pub trait LoadingView {
    fn set_visible(&self, visible: bool);
}

/// Holds the "starting" flag for the lifetime of one start attempt
///
/// The flag is released on drop, so every exit path of `start_game`
/// (success, error, early return) clears it.
struct StartingGuard<'a> {
    flag: &'a AtomicBool,
}

impl<'a> StartingGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self { flag })
    }
}

impl Drop for StartingGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

struct RunnerSlot<R> {
    runner: Option<R>,
    events: Option<mpsc::UnboundedReceiver<SessionEvent>>,
    callbacks_added: bool,
    mode: Option<GameMode>,
}

pub struct LobbyManager<F: RunnerFactory> {
    config: GameConfig,
    factory: F,
    starting: AtomicBool,
    slot: Mutex<RunnerSlot<F::Runner>>,
    scene_manager: OnceLock<Arc<SceneManager>>,
    registry: SpawnRegistry,
    loading_view: Option<Box<dyn LoadingView>>,
}

impl<F: RunnerFactory> LobbyManager<F> {
    pub fn new(config: GameConfig, factory: F) -> Self {
        Self {
            config,
            factory,
            starting: AtomicBool::new(false),
            slot: Mutex::new(RunnerSlot {
                runner: None,
                events: None,
                callbacks_added: false,
                mode: None,
            }),
            scene_manager: OnceLock::new(),
            registry: SpawnRegistry::new(),
            loading_view: None,
        }
    }

    pub fn with_loading_view(mut self, view: Box<dyn LoadingView>) -> Self {
        view.set_visible(false);
        self.loading_view = Some(view);
        self
    }

    pub fn config(&self) -> &GameConfig {
        &self.config
    }

    pub fn registry(&self) -> &SpawnRegistry {
        &self.registry
    }

    pub fn is_starting(&self) -> bool {
        self.starting.load(Ordering::Acquire)
    }

    /// False while a start request still holds the runner
    pub fn is_running(&self) -> bool {
        self.slot.try_lock().is_ok_and(|slot| {
            slot.runner
                .as_ref()
                .is_some_and(|runner| runner.is_running())
        })
    }

    pub fn mode(&self) -> Option<GameMode> {
        self.slot.try_lock().ok().and_then(|slot| slot.mode)
    }

    pub fn runner_mut(&mut self) -> Option<&mut F::Runner> {
        self.slot.get_mut().runner.as_mut()
    }

    pub fn scene_manager(&self) -> Option<&Arc<SceneManager>> {
        self.scene_manager.get()
    }

    pub async fn on_host_button_clicked(&self) -> Result<(), SessionError> {
        info!("[LobbyManager] Host button clicked");
        self.start_game(GameMode::Host).await
    }

    pub async fn on_join_button_clicked(&self) -> Result<(), SessionError> {
        info!("[LobbyManager] Join button clicked");
        self.start_game(GameMode::Client).await
    }

    /// Starts or joins the configured session
    ///
    /// Guard rejections and configuration errors are logged and returned;
    /// none of them leave partial session state behind.
    pub async fn start_game(&self, mode: GameMode) -> Result<(), SessionError> {
        let Some(_starting) = StartingGuard::acquire(&self.starting) else {
            warn!("[LobbyManager] start_game is already running");
            return Err(SessionError::AlreadyStarting);
        };

        let mut slot = self.slot.lock().await;
        if slot.runner.as_ref().is_some_and(|runner| runner.is_running()) {
            warn!("[LobbyManager] Runner is already running");
            return Err(SessionError::AlreadyRunning);
        }

        self.set_loading_visible(true);
        info!("[LobbyManager] start_game called with mode: {:?}", mode);

        let result = self.start_locked(&mut slot, mode).await;
        if let Err(e) = &result {
            error!("[LobbyManager] Failed to start session: {}", e);
            self.set_loading_visible(false);
        }
        result
    }

    async fn start_locked(
        &self,
        slot: &mut RunnerSlot<F::Runner>,
        mode: GameMode,
    ) -> Result<(), SessionError> {
        let scene = self.resolve_scene()?;
        debug!("[LobbyManager] Game scene build index: {:?}", scene.index());

        let scene_manager = Arc::clone(
            self.scene_manager
                .get_or_init(|| self.factory.create_scene_manager()),
        );
        let runner = Self::ensure_runner(&self.factory, slot);

        info!(
            "[LobbyManager] Starting session '{}'...",
            self.config.session_name
        );
        runner
            .start_game(StartGameArgs {
                game_mode: mode,
                session_name: self.config.session_name.clone(),
                scene,
                scene_manager,
                player_count: self.config.player_count,
            })
            .await?;

        slot.mode = Some(mode);
        info!("[LobbyManager] Session started as {:?}", mode);
        Ok(())
    }

    fn resolve_scene(&self) -> Result<SceneRef, SessionError> {
        let path = &self.config.scene_path;
        let Some(index) = self.config.build_index_by_path(path) else {
            error!(
                "[LobbyManager] {} not found in the build list. Check the path and build list.",
                path
            );
            return Err(SessionError::SceneNotFound(path.clone()));
        };

        let scene = SceneRef::from_index(index);
        if !scene.is_valid() {
            error!("[LobbyManager] Scene reference for {} is invalid", path);
            return Err(SessionError::InvalidScene(scene));
        }
        Ok(scene)
    }

    fn ensure_runner<'a>(factory: &F, slot: &'a mut RunnerSlot<F::Runner>) -> &'a mut F::Runner {
        let runner = slot.runner.get_or_insert_with(|| factory.create_runner());
        if !slot.callbacks_added {
            slot.events = Some(runner.add_callbacks());
            slot.callbacks_added = true;
        }
        runner.set_provide_input(true);
        runner
    }

    fn set_loading_visible(&self, visible: bool) {
        if let Some(view) = &self.loading_view {
            view.set_visible(visible);
        }
    }

    /// Drains pending lifecycle events and returns how many were handled
    pub fn pump_events(&mut self) -> usize {
        let Some(events) = self.slot.get_mut().events.as_mut() else {
            return 0;
        };

        let mut pending = Vec::new();
        while let Ok(event) = events.try_recv() {
            pending.push(event);
        }

        let count = pending.len();
        for event in pending {
            self.handle_event(event);
        }
        count
    }

    pub fn handle_event(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::PlayerJoined(player) => self.on_player_joined(player),
            SessionEvent::PlayerLeft(player) => self.on_player_left(player),
            SessionEvent::SceneLoadDone => self.on_scene_load_done(),
            SessionEvent::Shutdown(reason) => {
                info!("[LobbyManager] Session shut down: {:?}", reason);
                self.registry.clear();
                self.slot.get_mut().mode = None;
            }
            other => debug!("[LobbyManager] Ignoring session event {:?}", other),
        }
    }

    fn on_player_joined(&mut self, player: PlayerRef) {
        let Some(runner) = self.slot.get_mut().runner.as_mut() else {
            return;
        };
        if !runner.is_server() {
            return;
        }
        if self.registry.contains(player) {
            warn!("[LobbyManager] {} already has an avatar", player);
            return;
        }

        let position = spawn_position(player, self.config.player_count);
        match runner.spawn(SpawnRequest::player(position, player)) {
            Ok(avatar) => {
                info!(
                    "[LobbyManager] Spawned {} for {} at {}",
                    avatar, player, position
                );
                self.registry.insert(player, avatar);
            }
            Err(e) => error!("[LobbyManager] Failed to spawn avatar for {}: {}", player, e),
        }
    }

    fn on_player_left(&mut self, player: PlayerRef) {
        let Some(avatar) = self.registry.remove(player) else {
            return;
        };
        if let Some(runner) = self.slot.get_mut().runner.as_mut() {
            if let Err(e) = runner.despawn(avatar) {
                warn!("[LobbyManager] Failed to despawn {}: {}", avatar, e);
            }
        }
        info!("[LobbyManager] Despawned {} for {}", avatar, player);
    }

    fn on_scene_load_done(&mut self) {
        info!("[LobbyManager] Scene load done");
        self.set_loading_visible(false);
    }

    /// Leaves the session and forgets every spawned avatar
    pub fn shutdown(&mut self) {
        let slot = self.slot.get_mut();
        if let Some(runner) = slot.runner.as_mut() {
            runner.shutdown();
        }
        slot.mode = None;
        self.registry.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportError;
    use async_trait::async_trait;
    use glam::Vec3;
    use shared::NetworkId;
    use std::collections::HashSet;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex as StdMutex;

    #[derive(Default)]
    struct FakeLog {
        start_calls: usize,
        runners_created: usize,
        scene_managers_created: usize,
        spawned: Vec<SpawnRequest>,
        despawned: Vec<NetworkId>,
        subscribers: Vec<mpsc::UnboundedSender<SessionEvent>>,
        reject_clients: bool,
    }

    type SharedLog = Arc<StdMutex<FakeLog>>;

    struct FakeTransport {
        log: SharedLog,
        running: bool,
        server: bool,
        provide_input: bool,
        next_id: u32,
    }

    #[async_trait]
    impl SessionTransport for FakeTransport {
        async fn start_game(&mut self, args: StartGameArgs) -> Result<(), TransportError> {
            let reject = {
                let mut log = self.log.lock().unwrap();
                log.start_calls += 1;
                log.reject_clients && args.game_mode == GameMode::Client
            };
            tokio::task::yield_now().await;
            if reject {
                return Err(TransportError::SessionNotFound(args.session_name));
            }
            args.scene_manager.load_scene(args.scene);
            self.running = true;
            self.server = args.game_mode == GameMode::Host;
            Ok(())
        }

        fn add_callbacks(&mut self) -> mpsc::UnboundedReceiver<SessionEvent> {
            let (tx, rx) = mpsc::unbounded_channel();
            self.log.lock().unwrap().subscribers.push(tx);
            rx
        }

        fn set_provide_input(&mut self, provide: bool) {
            self.provide_input = provide;
        }

        fn provides_input(&self) -> bool {
            self.provide_input
        }

        fn is_running(&self) -> bool {
            self.running
        }

        fn is_server(&self) -> bool {
            self.server
        }

        fn local_player(&self) -> Option<PlayerRef> {
            self.running.then_some(PlayerRef(0))
        }

        fn spawn(&mut self, request: SpawnRequest) -> Result<NetworkId, TransportError> {
            self.next_id += 1;
            self.log.lock().unwrap().spawned.push(request);
            Ok(NetworkId(self.next_id))
        }

        fn despawn(&mut self, id: NetworkId) -> Result<(), TransportError> {
            self.log.lock().unwrap().despawned.push(id);
            Ok(())
        }

        fn shutdown(&mut self) {
            self.running = false;
        }
    }

    struct FakeFactory {
        log: SharedLog,
    }

    impl RunnerFactory for FakeFactory {
        type Runner = FakeTransport;

        fn create_runner(&self) -> FakeTransport {
            self.log.lock().unwrap().runners_created += 1;
            FakeTransport {
                log: Arc::clone(&self.log),
                running: false,
                server: false,
                provide_input: false,
                next_id: 0,
            }
        }

        fn create_scene_manager(&self) -> Arc<SceneManager> {
            self.log.lock().unwrap().scene_managers_created += 1;
            Arc::new(SceneManager::default())
        }
    }

    struct FlagView(Arc<AtomicUsize>);

    impl LoadingView for FlagView {
        fn set_visible(&self, visible: bool) {
            self.0.store(visible as usize, Ordering::SeqCst);
        }
    }

    fn lobby_with(config: GameConfig) -> (LobbyManager<FakeFactory>, SharedLog) {
        let log = SharedLog::default();
        let lobby = LobbyManager::new(
            config,
            FakeFactory {
                log: Arc::clone(&log),
            },
        );
        (lobby, log)
    }

    fn lobby() -> (LobbyManager<FakeFactory>, SharedLog) {
        lobby_with(GameConfig {
            player_count: 4,
            ..GameConfig::default()
        })
    }

    fn emit(log: &SharedLog, event: SessionEvent) {
        for subscriber in &log.lock().unwrap().subscribers {
            subscriber.send(event.clone()).unwrap();
        }
    }

    #[tokio::test]
    async fn test_concurrent_start_rejected() {
        let (lobby, log) = lobby();

        let (first, second) = tokio::join!(
            lobby.start_game(GameMode::Host),
            lobby.start_game(GameMode::Host)
        );

        let results = [first, second];
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(results
            .iter()
            .any(|r| matches!(r, Err(SessionError::AlreadyStarting))));
        assert_eq!(log.lock().unwrap().start_calls, 1);
        assert!(!lobby.is_starting());
    }

    #[tokio::test]
    async fn test_not_running_while_start_pending() {
        let (lobby, _log) = lobby();

        let (started, running_during_start) =
            tokio::join!(lobby.start_game(GameMode::Host), async { lobby.is_running() });

        started.unwrap();
        assert!(!running_during_start);
        assert!(lobby.is_running());
        assert_eq!(lobby.mode(), Some(GameMode::Host));
    }

    #[tokio::test]
    async fn test_start_while_running_rejected() {
        let (lobby, log) = lobby();

        lobby.start_game(GameMode::Host).await.unwrap();
        assert!(lobby.is_running());

        let result = lobby.start_game(GameMode::Client).await;
        assert!(matches!(result, Err(SessionError::AlreadyRunning)));
        assert!(result.unwrap_err().is_guard_rejection());
        assert_eq!(log.lock().unwrap().start_calls, 1);
        assert_eq!(lobby.mode(), Some(GameMode::Host));
    }

    #[tokio::test]
    async fn test_missing_scene_aborts_before_transport() {
        let (lobby, log) = lobby_with(GameConfig {
            scene_path: "scenes/missing".to_string(),
            ..GameConfig::default()
        });

        let result = lobby.start_game(GameMode::Host).await;
        assert!(matches!(result, Err(SessionError::SceneNotFound(_))));
        assert!(!lobby.is_starting());

        let log = log.lock().unwrap();
        assert_eq!(log.start_calls, 0);
        assert_eq!(log.runners_created, 0);
    }

    #[tokio::test]
    async fn test_runner_and_callbacks_created_once() {
        let (mut lobby, log) = lobby();
        log.lock().unwrap().reject_clients = true;

        let result = lobby.start_game(GameMode::Client).await;
        assert!(matches!(result, Err(SessionError::Transport(_))));
        assert!(!lobby.is_running());

        lobby.start_game(GameMode::Host).await.unwrap();
        assert!(lobby.is_running());
        assert!(lobby.runner_mut().unwrap().provides_input());

        let log = log.lock().unwrap();
        assert_eq!(log.start_calls, 2);
        assert_eq!(log.runners_created, 1);
        assert_eq!(log.scene_managers_created, 1);
        assert_eq!(log.subscribers.len(), 1);
    }

    #[tokio::test]
    async fn test_loading_view_follows_session() {
        let visible = Arc::new(AtomicUsize::new(1));
        let (lobby, log) = lobby();
        let mut lobby = lobby.with_loading_view(Box::new(FlagView(Arc::clone(&visible))));
        assert_eq!(visible.load(Ordering::SeqCst), 0);

        lobby.start_game(GameMode::Host).await.unwrap();
        assert_eq!(visible.load(Ordering::SeqCst), 1);

        emit(&log, SessionEvent::SceneLoadDone);
        lobby.pump_events();
        assert_eq!(visible.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_join_spawns_avatar_on_server() {
        let (mut lobby, log) = lobby();
        lobby.start_game(GameMode::Host).await.unwrap();

        emit(&log, SessionEvent::PlayerJoined(PlayerRef(2)));
        assert_eq!(lobby.pump_events(), 1);

        assert!(lobby.registry().contains(PlayerRef(2)));
        let log = log.lock().unwrap();
        assert_eq!(log.spawned.len(), 1);
        assert_eq!(log.spawned[0].position, Vec3::new(6.0, 10.0, 0.0));
        assert_eq!(log.spawned[0].input_authority, Some(PlayerRef(2)));
    }

    #[tokio::test]
    async fn test_join_ignored_on_client() {
        let (mut lobby, log) = lobby();
        lobby.start_game(GameMode::Client).await.unwrap();

        emit(&log, SessionEvent::PlayerJoined(PlayerRef(1)));
        lobby.pump_events();

        assert!(lobby.registry().is_empty());
        assert!(log.lock().unwrap().spawned.is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_join_spawns_once() {
        let (mut lobby, log) = lobby();
        lobby.start_game(GameMode::Host).await.unwrap();

        emit(&log, SessionEvent::PlayerJoined(PlayerRef(1)));
        emit(&log, SessionEvent::PlayerJoined(PlayerRef(1)));
        lobby.pump_events();

        assert_eq!(lobby.registry().len(), 1);
        assert_eq!(log.lock().unwrap().spawned.len(), 1);
    }

    #[tokio::test]
    async fn test_leave_without_join_is_noop() {
        let (mut lobby, log) = lobby();
        lobby.start_game(GameMode::Host).await.unwrap();

        emit(&log, SessionEvent::PlayerJoined(PlayerRef(0)));
        emit(&log, SessionEvent::PlayerLeft(PlayerRef(3)));
        lobby.pump_events();

        assert_eq!(lobby.registry().len(), 1);
        assert!(log.lock().unwrap().despawned.is_empty());
    }

    #[tokio::test]
    async fn test_full_session_join_and_leave() {
        let (mut lobby, log) = lobby();
        lobby.start_game(GameMode::Host).await.unwrap();

        for id in 0..4 {
            emit(&log, SessionEvent::PlayerJoined(PlayerRef(id)));
        }
        lobby.pump_events();
        assert_eq!(lobby.registry().len(), 4);

        let positions: HashSet<_> = log
            .lock()
            .unwrap()
            .spawned
            .iter()
            .map(|request| request.position.to_array().map(f32::to_bits))
            .collect();
        assert_eq!(positions.len(), 4);

        for id in [2, 0, 3, 1] {
            emit(&log, SessionEvent::PlayerLeft(PlayerRef(id)));
            lobby.pump_events();
            assert!(!lobby.registry().contains(PlayerRef(id)));
        }
        assert!(lobby.registry().is_empty());
        assert_eq!(log.lock().unwrap().despawned.len(), 4);
    }

    #[tokio::test]
    async fn test_shutdown_clears_registry() {
        let (mut lobby, log) = lobby();
        lobby.start_game(GameMode::Host).await.unwrap();
        emit(&log, SessionEvent::PlayerJoined(PlayerRef(0)));
        lobby.pump_events();

        lobby.shutdown();
        assert!(!lobby.is_running());
        assert!(lobby.registry().is_empty());
        assert_eq!(lobby.mode(), None);
    }
}

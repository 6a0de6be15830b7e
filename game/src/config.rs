//! Runtime configuration shared by the session coordinator and the demo binary

use shared::{DEFAULT_PLAYER_COUNT, DEFAULT_TICK_RATE};

pub const DEFAULT_SESSION_NAME: &str = "TestRoom";
pub const DEFAULT_SCENE_PATH: &str = "scenes/game";
pub const DEFAULT_MAX_CHAT_MESSAGES: usize = 50;

#[derive(Debug, Clone)]
pub struct GameConfig {
    /// Name of the session to create or join
    pub session_name: String,
    /// Scene loaded once the session is up, looked up in `build_scenes`
    pub scene_path: String,
    /// Scenes known to the build, in build-index order
    pub build_scenes: Vec<String>,
    /// Session capacity, also used to spread out spawn positions
    pub player_count: u32,
    /// Simulation ticks per second
    pub tick_rate: u32,
    pub max_chat_messages: usize,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            session_name: DEFAULT_SESSION_NAME.to_string(),
            scene_path: DEFAULT_SCENE_PATH.to_string(),
            build_scenes: vec!["scenes/lobby".to_string(), DEFAULT_SCENE_PATH.to_string()],
            player_count: DEFAULT_PLAYER_COUNT,
            tick_rate: DEFAULT_TICK_RATE,
            max_chat_messages: DEFAULT_MAX_CHAT_MESSAGES,
        }
    }
}

impl GameConfig {
    pub fn build_index_by_path(&self, path: &str) -> Option<usize> {
        self.build_scenes.iter().position(|scene| scene == path)
    }

    /// Length of one simulation tick in seconds
    pub fn delta_time(&self) -> f32 {
        1.0 / self.tick_rate.max(1) as f32
    }
}

//! AI director hook, run once per logic tick

use std::time::Duration;
use tracing::info;

use super::state::GameState;

/// Period between two zombie summons during the night
pub const SUMMON_PERIOD: Duration = Duration::from_secs(5);

/// Decides what the environment does to the players
pub trait AiDirector: Send {
    fn update(&mut self, dt: Duration, state: &mut GameState);
}

/// Summons zombies at the enemy spawn points while it is night
#[derive(Debug, Default)]
pub struct NightSpawner {
    since_last: Duration,
    was_night: bool,
}

impl NightSpawner {
    pub fn new() -> Self {
        Self::default()
    }
}

impl AiDirector for NightSpawner {
    fn update(&mut self, dt: Duration, state: &mut GameState) {
        let night = state.is_night();
        if night != self.was_night {
            info!(game_time = state.game_time, night, "Day/night switch");
            self.was_night = night;
            self.since_last = Duration::ZERO;
        }
        if !night {
            return;
        }
        self.since_last += dt;
        if self.since_last >= SUMMON_PERIOD {
            self.since_last = Duration::ZERO;
            state.spawn_zombie();
        }
    }
}

/// Director that leaves the world alone
#[derive(Debug, Default)]
pub struct Passive;

impl AiDirector for Passive {
    fn update(&mut self, _dt: Duration, _state: &mut GameState) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::events::EventBus;
    use crate::game::state::tests::test_state;

    fn zombies(state: &GameState) -> usize {
        state.entities.values().filter(|e| e.is_zombie()).count()
    }

    #[test]
    fn zombies_come_out_at_night_only() {
        let bus: EventBus<()> = EventBus::new();
        let mut state = test_state(&bus);
        let mut director = NightSpawner::new();

        state.game_time = 720;
        for _ in 0..10 {
            director.update(Duration::from_secs(1), &mut state);
        }
        assert_eq!(zombies(&state), 0);

        state.game_time = 1200;
        for _ in 0..10 {
            director.update(Duration::from_secs(1), &mut state);
        }
        assert_eq!(zombies(&state), 2);
    }

    #[test]
    fn passive_director_does_nothing() {
        let bus: EventBus<()> = EventBus::new();
        let mut state = test_state(&bus);
        state.game_time = 1200;
        let before = state.entities.len();
        Passive.update(SUMMON_PERIOD * 2, &mut state);
        assert_eq!(state.entities.len(), before);
    }
}

//! Action stack of mobile entities

use tracing::warn;

use super::math::Vec2;

/// Action type ids as sent in snapshots
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ActionType {
    Idle = 0,
    Move = 1,
    Build = 2,
    Repair = 3,
    Attack = 4,
    DrinkCoffee = 5,
    WaitingForPath = 6,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Action {
    Idle,
    Move { dst: Vec2 },
    WaitingForPath,
    Build { building_id: u32 },
    Repair { building_id: u32 },
    Attack { target_id: u32 },
    DrinkCoffee { object_id: u32 },
}

impl Action {
    pub fn action_type(&self) -> ActionType {
        match self {
            Action::Idle => ActionType::Idle,
            Action::Move { .. } => ActionType::Move,
            Action::WaitingForPath => ActionType::WaitingForPath,
            Action::Build { .. } => ActionType::Build,
            Action::Repair { .. } => ActionType::Repair,
            Action::Attack { .. } => ActionType::Attack,
            Action::DrinkCoffee { .. } => ActionType::DrinkCoffee,
        }
    }
}

/// Stack of in-progress actions; the bottom is always `Idle`
#[derive(Debug, Clone)]
pub struct ActionStack {
    actions: Vec<Action>,
}

impl ActionStack {
    pub fn new() -> Self {
        Self {
            actions: vec![Action::Idle],
        }
    }

    pub fn top(&self) -> Action {
        self.actions.last().copied().unwrap_or(Action::Idle)
    }

    /// Action right below the top, if any
    pub fn below_top(&self) -> Option<Action> {
        self.actions.iter().rev().nth(1).copied()
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_idle(&self) -> bool {
        self.actions.len() == 1
    }

    pub fn push(&mut self, action: Action) {
        debug_assert!(action != Action::Idle, "Idle only lives at the bottom");
        self.actions.push(action);
    }

    /// Pop the top action; the bottom `Idle` stays
    pub fn pop(&mut self) -> Option<Action> {
        if self.actions.len() <= 1 {
            debug_assert!(false, "popping the Idle action");
            warn!("Attempt to pop the Idle action ignored");
            return None;
        }
        self.actions.pop()
    }

    /// Drop everything above `Idle`
    pub fn reset(&mut self) {
        self.actions.truncate(1);
    }

    /// Replace everything above `Idle` with `actions`, bottom first
    pub fn replace(&mut self, actions: &[Action]) {
        self.reset();
        for action in actions {
            self.push(*action);
        }
    }

    pub fn bottom(&self) -> Action {
        self.actions[0]
    }

    pub fn iter(&self) -> impl Iterator<Item = &Action> {
        self.actions.iter()
    }
}

impl Default for ActionStack {
    fn default() -> Self {
        Self::new()
    }
}

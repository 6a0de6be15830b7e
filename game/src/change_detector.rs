//! Per-avatar diff of replicated fields between render passes

use shared::AvatarState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReplicatedField {
    Position,
    Rotation,
    Delay,
    SpawnedProjectile,
}

/// Remembers the state observed at the end of the previous pass
#[derive(Debug, Clone)]
pub struct ChangeDetector {
    previous: AvatarState,
}

impl ChangeDetector {
    pub fn new(initial: AvatarState) -> Self {
        Self { previous: initial }
    }

    /// Returns every field that differs from the last pass, then remembers `current`
    pub fn detect_changes(&mut self, current: &AvatarState) -> Vec<ReplicatedField> {
        let mut changed = Vec::new();
        if current.position != self.previous.position {
            changed.push(ReplicatedField::Position);
        }
        if current.rotation != self.previous.rotation {
            changed.push(ReplicatedField::Rotation);
        }
        if current.delay != self.previous.delay {
            changed.push(ReplicatedField::Delay);
        }
        if current.spawned_projectile != self.previous.spawned_projectile {
            changed.push(ReplicatedField::SpawnedProjectile);
        }

        self.previous = *current;
        changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::{Quat, Vec3};
    use shared::TickTimer;

    #[test]
    fn test_no_change_reports_nothing() {
        let state = AvatarState::new(Vec3::ZERO, Quat::IDENTITY);
        let mut detector = ChangeDetector::new(state);
        assert!(detector.detect_changes(&state).is_empty());
    }

    #[test]
    fn test_reports_each_changed_field_once() {
        let initial = AvatarState::new(Vec3::ZERO, Quat::IDENTITY);
        let mut detector = ChangeDetector::new(initial);

        let mut next = initial;
        next.position = Vec3::X;
        next.delay = TickTimer::from_ticks(0, 30);
        next.spawned_projectile = true;

        let changed = detector.detect_changes(&next);
        assert_eq!(
            changed,
            vec![
                ReplicatedField::Position,
                ReplicatedField::Delay,
                ReplicatedField::SpawnedProjectile
            ]
        );

        // Already observed
        assert!(detector.detect_changes(&next).is_empty());
    }
}

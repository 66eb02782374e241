use serde::{Deserialize, Serialize};

/// ラベルストアの1行
///
/// `tag_flags` の順序はタグスキーマの登録順と一致します。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SampleRow {
    pub app_id: i64,
    pub tag_flags: Vec<bool>,
}

impl SampleRow {
    pub fn new(app_id: i64, tag_flags: Vec<bool>) -> Self {
        Self { app_id, tag_flags }
    }

    /// 0/1 のラベルベクトル
    pub fn label_vector(&self) -> Vec<f32> {
        self.tag_flags
            .iter()
            .map(|&on| if on { 1.0 } else { 0.0 })
            .collect()
    }
}

/// 学習用/評価用への分割結果（app_id の集合）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Split {
    pub train: Vec<i64>,
    pub test: Vec<i64>,
}

impl Split {
    pub fn total(&self) -> usize {
        self.train.len() + self.test.len()
    }
}

// 学習ループの状態
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrainingPhase {
    Idle,
    TrainEpoch(usize),
    EvalEpoch(usize),
    Done,
}

impl TrainingPhase {
    /// 許可された遷移か
    ///
    /// Idle → TrainEpoch(e) → EvalEpoch(e) → Idle → ... → Done
    pub fn can_transition_to(self, next: TrainingPhase) -> bool {
        match (self, next) {
            (TrainingPhase::Idle, TrainingPhase::TrainEpoch(_)) => true,
            (TrainingPhase::Idle, TrainingPhase::Done) => true,
            (TrainingPhase::TrainEpoch(a), TrainingPhase::EvalEpoch(b)) => a == b,
            (TrainingPhase::EvalEpoch(_), TrainingPhase::Idle) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for TrainingPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TrainingPhase::Idle => write!(f, "Idle"),
            TrainingPhase::TrainEpoch(e) => write!(f, "TrainEpoch({})", e),
            TrainingPhase::EvalEpoch(e) => write!(f, "EvalEpoch({})", e),
            TrainingPhase::Done => write!(f, "Done"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_label_vector() {
        let row = SampleRow::new(42, vec![true, false, true]);
        assert_eq!(row.label_vector(), vec![1.0, 0.0, 1.0]);
    }

    #[test]
    fn test_phase_transitions() {
        use TrainingPhase::*;
        assert!(Idle.can_transition_to(TrainEpoch(1)));
        assert!(TrainEpoch(1).can_transition_to(EvalEpoch(1)));
        assert!(!TrainEpoch(1).can_transition_to(EvalEpoch(2)));
        assert!(EvalEpoch(1).can_transition_to(Idle));
        assert!(Idle.can_transition_to(Done));
        assert!(!TrainEpoch(1).can_transition_to(Done));
        assert!(!Done.can_transition_to(Idle));
        assert!(!EvalEpoch(1).can_transition_to(TrainEpoch(2)));
    }
}

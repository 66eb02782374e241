//! マルチラベル評価指標
//!
//! バッチごとの指標を平均するのではなく、タグごとの TP/FP/TN/FN を全バッチで
//! 合算してから最後に一度だけ指標を計算します（バッチサイズの偏りを避けるため）。

use serde::{Deserialize, Serialize};

/// 1タグ分の混同行列カウント
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfusionCounts {
    pub tp: u64,
    pub fp: u64,
    pub tn: u64,
    pub fn_: u64,
}

impl ConfusionCounts {
    pub fn total(&self) -> u64 {
        self.tp + self.fp + self.tn + self.fn_
    }

    fn ratio(num: u64, den: u64) -> f64 {
        if den == 0 {
            0.0
        } else {
            num as f64 / den as f64
        }
    }

    /// 正例の予測も正解も無い場合は完全一致とみなす
    fn no_positives(&self) -> bool {
        self.tp + self.fp + self.fn_ == 0
    }

    pub fn accuracy(&self) -> f64 {
        Self::ratio(self.tp + self.tn, self.total())
    }

    pub fn precision(&self) -> f64 {
        if self.no_positives() {
            return 1.0;
        }
        Self::ratio(self.tp, self.tp + self.fp)
    }

    pub fn recall(&self) -> f64 {
        if self.no_positives() {
            return 1.0;
        }
        Self::ratio(self.tp, self.tp + self.fn_)
    }

    pub fn f1(&self) -> f64 {
        let p = self.precision();
        let r = self.recall();
        if p + r == 0.0 {
            0.0
        } else {
            2.0 * p * r / (p + r)
        }
    }
}

/// タグごとの指標
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TagMetrics {
    pub tag: String,
    pub accuracy: f64,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub counts: ConfusionCounts,
}

/// 評価パス1回分の結果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationReport {
    pub per_tag: Vec<TagMetrics>,
    /// 評価したサンプル数
    pub samples: u64,
}

impl EvaluationReport {
    fn macro_avg(&self, f: impl Fn(&TagMetrics) -> f64) -> f64 {
        if self.per_tag.is_empty() {
            return 0.0;
        }
        self.per_tag.iter().map(f).sum::<f64>() / self.per_tag.len() as f64
    }

    pub fn macro_accuracy(&self) -> f64 {
        self.macro_avg(|m| m.accuracy)
    }

    pub fn macro_precision(&self) -> f64 {
        self.macro_avg(|m| m.precision)
    }

    pub fn macro_recall(&self) -> f64 {
        self.macro_avg(|m| m.recall)
    }

    pub fn macro_f1(&self) -> f64 {
        self.macro_avg(|m| m.f1)
    }

    pub fn tag(&self, name: &str) -> Option<&TagMetrics> {
        self.per_tag.iter().find(|m| m.tag == name)
    }
}

/// 評価パス全体で混同行列を集計する
#[derive(Debug, Clone)]
pub struct MultiLabelConfusion {
    tags: Vec<String>,
    threshold: f32,
    counts: Vec<ConfusionCounts>,
    samples: u64,
}

impl MultiLabelConfusion {
    pub fn new(tags: Vec<String>, threshold: f32) -> Self {
        let counts = vec![ConfusionCounts::default(); tags.len()];
        Self {
            tags,
            threshold,
            counts,
            samples: 0,
        }
    }

    pub fn num_tags(&self) -> usize {
        self.tags.len()
    }

    /// 1バッチ分を加算
    ///
    /// `probabilities` と `targets` は行優先 [batch, num_tags] の平坦な配列です。
    pub fn update(&mut self, probabilities: &[f32], targets: &[f32]) {
        let num_tags = self.tags.len();
        debug_assert_eq!(probabilities.len(), targets.len());
        debug_assert_eq!(probabilities.len() % num_tags.max(1), 0);

        for (p_row, t_row) in probabilities.chunks(num_tags).zip(targets.chunks(num_tags)) {
            for (tag, (&p, &t)) in p_row.iter().zip(t_row).enumerate() {
                let predicted = p >= self.threshold;
                let actual = t >= 0.5;
                let c = &mut self.counts[tag];
                match (predicted, actual) {
                    (true, true) => c.tp += 1,
                    (true, false) => c.fp += 1,
                    (false, false) => c.tn += 1,
                    (false, true) => c.fn_ += 1,
                }
            }
            self.samples += 1;
        }
    }

    /// 集計を確定して指標に変換
    pub fn finalize(&self) -> EvaluationReport {
        let per_tag = self
            .tags
            .iter()
            .zip(&self.counts)
            .map(|(tag, c)| TagMetrics {
                tag: tag.clone(),
                accuracy: c.accuracy(),
                precision: c.precision(),
                recall: c.recall(),
                f1: c.f1(),
                counts: *c,
            })
            .collect();

        EvaluationReport {
            per_tag,
            samples: self.samples,
        }
    }
}

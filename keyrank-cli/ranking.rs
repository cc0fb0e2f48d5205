use keyrank_core::MatchSet;

use crate::{PipelineError, PipelineResult};

/// Summed confidence of the valid matches of the first image.
///
/// Not averaged: a candidate sharing fewer keypoints with the reference
/// scores lower.
pub fn ranking_score(matches: &MatchSet) -> f32 {
    matches.pairs().fold(0.0, |acc, (i, _)| acc + matches.confidence0[i])
}

/// One row of a ranking report
#[derive(Debug, Clone, PartialEq)]
pub struct RankingEntry {
    pub image: String,
    pub score: f32,
    /// Score relative to the reference's self-match, e.g. `62.500%`
    pub percentage: String,
}

/// Candidates of one reference image, best first
#[derive(Debug, Clone, PartialEq)]
pub struct RankingTable {
    pub reference: String,
    pub entries: Vec<RankingEntry>,
}

impl RankingTable {
    /// Sort `scores` by descending raw score and express each relative to the
    /// score of `reference`, which must be present, finite and non-zero.
    pub fn build(reference: &str, scores: &[(String, f32)]) -> PipelineResult<Self> {
        let full_score = scores
            .iter()
            .find(|(image, _)| image == reference)
            .map(|&(_, score)| score)
            .ok_or_else(|| PipelineError::MissingSelfScore(reference.to_string()))?;
        if !full_score.is_finite() || full_score == 0.0 {
            return Err(PipelineError::InvalidSelfScore {
                reference: reference.to_string(),
                score: full_score,
            });
        }

        let mut entries: Vec<RankingEntry> = scores
            .iter()
            .map(|(image, score)| RankingEntry {
                image: image.clone(),
                score: *score,
                percentage: format!("{:.3}%", score / full_score * 100.0),
            })
            .collect();
        entries.sort_by(|a, b| b.score.total_cmp(&a.score));

        Ok(Self {
            reference: reference.to_string(),
            entries,
        })
    }

    /// Report with a leading row-index column: `,image,score`
    pub fn to_csv(&self) -> String {
        let mut csv = String::from(",image,score\n");
        for (row, entry) in self.entries.iter().enumerate() {
            csv.push_str(&format!("{},{},{}\n", row, csv_field(&entry.image), entry.percentage));
        }
        csv
    }
}

/// Quote a field holding a separator, quote or line break, doubling inner quotes
fn csv_field(value: &str) -> std::borrow::Cow<'_, str> {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\"")).into()
    } else {
        value.into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use keyrank_core::NO_MATCH;

    fn scores(values: &[(&str, f32)]) -> Vec<(String, f32)> {
        values.iter().map(|&(name, score)| (name.to_string(), score)).collect()
    }

    #[test]
    fn test_score_sums_valid_confidences() {
        let matches = MatchSet {
            matches0: vec![2, NO_MATCH, 0],
            matches1: vec![2, NO_MATCH, 0],
            confidence0: vec![0.5, 0.0, 0.25],
            confidence1: vec![0.25, 0.0, 0.5],
        };
        assert_abs_diff_eq!(ranking_score(&matches), 0.75);
        assert_eq!(ranking_score(&MatchSet::unmatched(3, 0)), 0.0);
    }

    #[test]
    fn test_percentages_sorted_descending() {
        let table = RankingTable::build("c", &scores(&[("a", 50.0), ("b", 30.0), ("c", 80.0)])).unwrap();
        let rows: Vec<(&str, &str)> = table
            .entries
            .iter()
            .map(|e| (e.image.as_str(), e.percentage.as_str()))
            .collect();
        assert_eq!(rows, vec![("c", "100.000%"), ("a", "62.500%"), ("b", "37.500%")]);
    }

    #[test]
    fn test_missing_self_score() {
        let err = RankingTable::build("ref", &scores(&[("a", 1.0)])).unwrap_err();
        assert!(matches!(err, PipelineError::MissingSelfScore(ref name) if name == "ref"));
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_zero_self_score_rejected() {
        let err = RankingTable::build("ref", &scores(&[("ref", 0.0), ("a", 0.0)])).unwrap_err();
        assert!(matches!(err, PipelineError::InvalidSelfScore { .. }));
    }

    #[test]
    fn test_csv_layout() {
        let table = RankingTable::build("c", &scores(&[("a", 40.0), ("c", 80.0)])).unwrap();
        assert_eq!(table.to_csv(), ",image,score\n0,c,100.000%\n1,a,50.000%\n");
    }

    #[test]
    fn test_unmatched_candidate_reports_plain_zero() {
        let unmatched = ranking_score(&MatchSet::unmatched(3, 2));
        assert!(unmatched.is_sign_positive());
        let table = RankingTable::build("r", &scores(&[("r", 80.0), ("c", unmatched)])).unwrap();
        assert_eq!(table.entries[1].percentage, "0.000%");
        assert_eq!(table.to_csv(), ",image,score\n0,r,100.000%\n1,c,0.000%\n");
    }

    #[test]
    fn test_csv_quotes_awkward_names() {
        let table = RankingTable::build(
            "ref",
            &scores(&[("ref", 2.0), ("a,b", 1.0), ("say \"hi\"", 0.5)]),
        )
        .unwrap();
        assert_eq!(
            table.to_csv(),
            ",image,score\n0,ref,100.000%\n1,\"a,b\",50.000%\n2,\"say \"\"hi\"\"\",25.000%\n"
        );
    }
}

//! Scoring model results against the human votes.

use std::collections::{BTreeMap, BTreeSet};

use tracing::debug;

use crate::dataset::Dataset;
use crate::error::{DebateGptError, Result};
use crate::metrics::{
    BootstrapInterval, ConfusionMatrix, KappaEstimate, bootstrap_accuracy, cohens_kappa,
    fleiss_kappa,
};
use crate::normalize::{Label, ResponseNormalizer, extract_reasoned_answer};
use crate::prompt::Task;
use crate::results::ResultRecord;
use crate::votes::VoteCategory;

/// A result's identity: the debate, and the voter for per-voter tasks.
pub type ResultKey = (String, Option<String>);

fn result_key(record: &ResultRecord) -> ResultKey {
    (record.debate_id.clone(), record.voter_id.clone())
}

/// Collapse several labels into one.
///
/// Ties win only when they outnumber both sides; otherwise the larger side
/// wins and an even split is a tie.
pub fn majority_vote(labels: impl IntoIterator<Item = Label>) -> Label {
    let (mut pro, mut con, mut tie) = (0usize, 0usize, 0usize);
    for label in labels {
        match label {
            Label::Pro => pro += 1,
            Label::Con => con += 1,
            Label::Tie => tie += 1,
            Label::Other => {}
        }
    }
    if tie > pro && tie > con {
        Label::Tie
    } else if pro > con {
        Label::Pro
    } else if con > pro {
        Label::Con
    } else {
        Label::Tie
    }
}

/// Human answer for every result key of `task` in `dataset`.
///
/// q1 takes the majority of the "more convincing arguments" votes of each
/// debate; q2 and q3 take each voter's stance before and after the debate.
pub fn ground_truth(task: Task, dataset: &Dataset) -> BTreeMap<ResultKey, Label> {
    let mut truth = BTreeMap::new();
    for debate in dataset.debates() {
        let votes = dataset.votes(&debate.debate_id);
        match task {
            Task::WhoWon => {
                if votes.is_empty() {
                    continue;
                }
                let label = majority_vote(
                    votes
                        .iter()
                        .map(|v| v.outcome(VoteCategory::MoreConvincingArguments)),
                );
                truth.insert((debate.debate_id.clone(), None), label);
            }
            Task::PropositionVoter { .. } | Task::DebateDemographics => {
                let category = if task == Task::DebateDemographics {
                    VoteCategory::AgreedAfter
                } else {
                    VoteCategory::AgreedBefore
                };
                for vote in votes {
                    truth.insert(
                        (debate.debate_id.clone(), Some(vote.voter_id.clone())),
                        vote.outcome(category),
                    );
                }
            }
        }
    }
    truth
}

/// The answer part of a response: everything after `Answer:` for reasoning
/// prompts, the whole response otherwise.
fn answer_text(task: Task, response: &str) -> &str {
    match task {
        Task::PropositionVoter {
            reasoning: true, ..
        } => extract_reasoned_answer(response),
        _ => response.trim(),
    }
}

/// Normalized label of every result, keyed by debate and voter.
///
/// A key that occurs more than once keeps its last result.
pub fn normalized_answers(
    task: Task,
    records: &[ResultRecord],
    normalizer: &ResponseNormalizer,
) -> BTreeMap<ResultKey, Label> {
    records
        .iter()
        .map(|r| (result_key(r), normalizer.normalize(answer_text(task, &r.gpt_response))))
        .collect()
}

/// Bootstrap parameters of a score report.
#[derive(Debug, Clone, Copy)]
pub struct BootstrapSettings {
    pub repetitions: usize,
    pub sample_size: usize,
    pub seed: u64,
}

impl Default for BootstrapSettings {
    fn default() -> Self {
        Self {
            repetitions: 1000,
            sample_size: 100,
            seed: 42,
        }
    }
}

/// How well one result file matches the human answers.
#[derive(Debug, Clone)]
pub struct ScoreReport {
    pub responses: usize,
    /// Responses that could be matched to a human answer.
    pub scored: usize,
    /// Share of responses that were exactly `Pro`, `Con` or `Tie`.
    pub correct_form: f64,
    pub matrix: ConfusionMatrix,
    pub bootstrap: Option<BootstrapInterval>,
}

impl ScoreReport {
    pub fn accuracy(&self) -> Option<f64> {
        self.matrix.accuracy()
    }

    pub fn precision(&self, label: Label) -> Option<f64> {
        self.matrix.precision(label)
    }

    pub fn recall(&self, label: Label) -> Option<f64> {
        self.matrix.recall(label)
    }

    /// Responses that could not be mapped onto an answer label.
    pub fn other(&self) -> usize {
        Label::ALL
            .iter()
            .map(|truth| self.matrix.count(*truth, Label::Other))
            .sum()
    }
}

/// Score `records` against `truth`.
pub fn score(
    task: Task,
    records: &[ResultRecord],
    truth: &BTreeMap<ResultKey, Label>,
    normalizer: &ResponseNormalizer,
    settings: BootstrapSettings,
) -> Result<ScoreReport> {
    let correct_form = records
        .iter()
        .filter(|r| {
            Label::from_canonical(answer_text(task, &r.gpt_response))
                .is_some_and(|l| Label::ANSWERS.contains(&l))
        })
        .count();

    let pairs: Vec<(Label, Label)> = normalized_answers(task, records, normalizer)
        .into_iter()
        .filter_map(|(key, predicted)| truth.get(&key).map(|t| (*t, predicted)))
        .collect();
    debug!(
        responses = records.len(),
        scored = pairs.len(),
        "Joined responses to ground truth"
    );

    let bootstrap = if pairs.is_empty() {
        None
    } else {
        Some(bootstrap_accuracy(
            &pairs,
            settings.repetitions,
            settings.sample_size,
            settings.seed,
        )?)
    };

    Ok(ScoreReport {
        responses: records.len(),
        scored: pairs.len(),
        correct_form: if records.is_empty() {
            0.0
        } else {
            correct_form as f64 / records.len() as f64
        },
        matrix: ConfusionMatrix::from_pairs(&pairs),
        bootstrap,
    })
}

/// Agreement between several models on the same prompts.
#[derive(Debug, Clone, Copy)]
pub struct AgreementReport {
    /// Keys answered by every model.
    pub items: usize,
    pub raters: usize,
    pub estimate: KappaEstimate,
}

/// Kappa across result files: Cohen's for two files, Fleiss' for more.
///
/// Only keys present in every file are compared.
pub fn model_agreement(
    task: Task,
    runs: &[Vec<ResultRecord>],
    normalizer: &ResponseNormalizer,
    alpha: f64,
) -> Result<AgreementReport> {
    if runs.len() < 2 {
        return Err(DebateGptError::InvalidInputShape(format!(
            "agreement needs at least 2 result files, got {}",
            runs.len()
        )));
    }

    let answers: Vec<BTreeMap<ResultKey, Label>> = runs
        .iter()
        .map(|records| normalized_answers(task, records, normalizer))
        .collect();
    let shared: BTreeSet<&ResultKey> = answers[0]
        .keys()
        .filter(|key| answers[1..].iter().all(|a| a.contains_key(*key)))
        .collect();
    let rows: Vec<Vec<Label>> = shared
        .iter()
        .map(|key| answers.iter().map(|a| a[*key]).collect())
        .collect();

    let estimate = if runs.len() == 2 {
        let pairs: Vec<(Label, Label)> = rows.iter().map(|r| (r[0], r[1])).collect();
        cohens_kappa(&pairs, alpha)?
    } else {
        fleiss_kappa(&rows, alpha)?
    };

    Ok(AgreementReport {
        items: rows.len(),
        raters: runs.len(),
        estimate,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::debates::DebateRecord;
    use crate::prompt::ChatMessage;
    use crate::votes::VoteRow;

    fn vote(debate_id: &str, voter: &str, before: &str, after: &str, arguments: &str) -> VoteRow {
        VoteRow {
            debate_id: debate_id.into(),
            pro_user_id: "alice".into(),
            con_user_id: "bob".into(),
            voter_id: voter.into(),
            agreed_before: before.into(),
            agreed_after: after.into(),
            better_conduct: "Tie".into(),
            better_spelling_and_grammar: "Tie".into(),
            more_convincing_arguments: arguments.into(),
            most_reliable_sources: "Tie".into(),
            flipped: before != after,
        }
    }

    fn debate(id: &str) -> DebateRecord {
        DebateRecord {
            debate_id: id.into(),
            pro_user_id: "alice".into(),
            con_user_id: "bob".into(),
            title: None,
            category: None,
            start_date: None,
            proposition: Some("x".into()),
        }
    }

    fn record(debate_id: &str, voter_id: Option<&str>, response: &str) -> ResultRecord {
        ResultRecord {
            debate_id: debate_id.into(),
            voter_id: voter_id.map(str::to_string),
            message: vec![ChatMessage::user("?")],
            gpt_response: response.into(),
            agreed_before: None,
            agreed_after: None,
        }
    }

    #[test]
    fn test_majority_vote() {
        use Label::*;
        assert_eq!(majority_vote([Pro, Pro, Con]), Pro);
        assert_eq!(majority_vote([Con, Tie, Con]), Con);
        assert_eq!(majority_vote([Tie, Tie, Pro]), Tie);
        assert_eq!(majority_vote([Pro, Con]), Tie);
        assert_eq!(majority_vote([Pro, Tie, Tie, Con, Pro]), Pro);
        assert_eq!(majority_vote([]), Tie);
    }

    #[test]
    fn test_ground_truth_per_task() {
        let dataset = Dataset::new(
            vec![debate("1"), debate("2")],
            vec![],
            vec![
                vote("1", "carol", "bob", "alice", "alice"),
                vote("1", "dave", "Tie", "alice", "alice"),
                vote("1", "erin", "bob", "bob", "bob"),
            ],
            vec![],
        );

        let q1 = ground_truth(Task::WhoWon, &dataset);
        assert_eq!(q1.len(), 1);
        assert_eq!(q1[&("1".to_string(), None)], Label::Pro);

        let q2 = ground_truth(
            Task::PropositionVoter {
                reasoning: false,
                big_issues: false,
            },
            &dataset,
        );
        assert_eq!(q2[&("1".to_string(), Some("dave".to_string()))], Label::Tie);
        assert_eq!(q2[&("1".to_string(), Some("carol".to_string()))], Label::Con);

        let q3 = ground_truth(Task::DebateDemographics, &dataset);
        assert_eq!(q3[&("1".to_string(), Some("carol".to_string()))], Label::Pro);
        assert_eq!(q3[&("1".to_string(), Some("erin".to_string()))], Label::Con);
    }

    #[test]
    fn test_score_report() {
        let truth: BTreeMap<ResultKey, Label> = [
            (("1".to_string(), None), Label::Pro),
            (("2".to_string(), None), Label::Con),
            (("3".to_string(), None), Label::Con),
            (("4".to_string(), None), Label::Tie),
        ]
        .into();
        let records = vec![
            record("1", None, "Pro"),
            record("2", None, "I think con argued better."),
            record("3", None, "Pro"),
            record("4", None, "Both pro and con made points."),
            record("5", None, "Tie"),
        ];

        let report = score(
            Task::WhoWon,
            &records,
            &truth,
            &ResponseNormalizer::new(),
            BootstrapSettings::default(),
        )
        .unwrap();
        assert_eq!(report.responses, 5);
        assert_eq!(report.scored, 4);
        assert!((report.correct_form - 0.6).abs() < 1e-9);
        assert_eq!(report.accuracy(), Some(0.5));
        assert_eq!(report.precision(Label::Pro), Some(0.5));
        assert_eq!(report.recall(Label::Con), Some(0.5));
        assert_eq!(report.other(), 1);
        let interval = report.bootstrap.unwrap();
        assert!(interval.lower <= 0.5 && 0.5 <= interval.upper);
    }

    #[test]
    fn test_reasoning_responses_use_answer_marker() {
        let task = Task::PropositionVoter {
            reasoning: true,
            big_issues: true,
        };
        let truth: BTreeMap<ResultKey, Label> =
            [(("1".to_string(), Some("carol".to_string())), Label::Con)].into();
        let records = vec![record(
            "1",
            Some("carol"),
            "You are pro-life, so you would oppose this. Answer: Con",
        )];

        let report = score(
            task,
            &records,
            &truth,
            &ResponseNormalizer::new(),
            BootstrapSettings::default(),
        )
        .unwrap();
        assert_eq!(report.correct_form, 1.0);
        assert_eq!(report.accuracy(), Some(1.0));
    }

    #[test]
    fn test_agreement_between_two_models() {
        let first = vec![
            record("1", None, "Pro"),
            record("2", None, "Con"),
            record("3", None, "Tie"),
            record("4", None, "Pro"),
            record("9", None, "Con"),
        ];
        let second = vec![
            record("1", None, "Pro"),
            record("2", None, "Con"),
            record("3", None, "Pro"),
            record("4", None, "Pro"),
        ];

        let report =
            model_agreement(Task::WhoWon, &[first, second], &ResponseNormalizer::new(), 0.05)
                .unwrap();
        assert_eq!(report.items, 4);
        assert_eq!(report.raters, 2);
        // observed 3/4, chance 7/16
        assert!((report.estimate.kappa - 5.0 / 9.0).abs() < 1e-9);
    }

    #[test]
    fn test_agreement_between_three_models() {
        let run = |answers: [&str; 3]| -> Vec<ResultRecord> {
            answers
                .iter()
                .enumerate()
                .map(|(i, a)| record(&i.to_string(), None, a))
                .collect()
        };
        let runs = vec![
            run(["Pro", "Con", "Tie"]),
            run(["Pro", "Con", "Tie"]),
            run(["Pro", "Con", "Tie"]),
        ];

        let report =
            model_agreement(Task::WhoWon, &runs, &ResponseNormalizer::new(), 0.05).unwrap();
        assert_eq!(report.raters, 3);
        assert!((report.estimate.kappa - 1.0).abs() < 1e-9);

        let single = model_agreement(Task::WhoWon, &runs[..1], &ResponseNormalizer::new(), 0.05);
        assert!(matches!(single, Err(DebateGptError::InvalidInputShape(_))));
    }
}

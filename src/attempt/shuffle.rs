use std::collections::BTreeMap;

use rand::rngs::StdRng;
use rand::{seq::SliceRandom, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::schemas::exam::Exam;

/// Display order of one multiple-choice question's options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OptionShuffle {
    pub shuffled_options: Vec<String>,
    /// `index_mapping[displayed] == original`.
    pub index_mapping: Vec<usize>,
}

impl OptionShuffle {
    pub fn original_index(&self, displayed: usize) -> Option<usize> {
        self.index_mapping.get(displayed).copied()
    }

    pub fn displayed_index(&self, original: usize) -> Option<usize> {
        self.index_mapping.iter().position(|&value| value == original)
    }

    pub fn option_text(&self, displayed: usize) -> Option<&str> {
        self.shuffled_options.get(displayed).map(String::as_str)
    }
}

/// Per-attempt permutation of questions and options. Generated once, then only ever restored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShuffleLayout {
    pub seed: u64,
    /// `question_order[position] == original question index`.
    pub question_order: Vec<usize>,
    #[serde(default)]
    pub options: BTreeMap<String, OptionShuffle>,
}

impl ShuffleLayout {
    pub fn generate(exam: &Exam, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);

        let mut question_order: Vec<usize> = (0..exam.questions.len()).collect();
        if exam.shuffle_questions {
            question_order.shuffle(&mut rng);
        }

        let mut options = BTreeMap::new();
        if exam.shuffle_options {
            for question in exam.questions.iter().filter(|q| q.kind.takes_choice()) {
                if question.options.is_empty() {
                    continue;
                }
                let mut index_mapping: Vec<usize> = (0..question.options.len()).collect();
                index_mapping.shuffle(&mut rng);
                let shuffled_options =
                    index_mapping.iter().map(|&original| question.options[original].clone()).collect();
                options.insert(question.id.clone(), OptionShuffle { shuffled_options, index_mapping });
            }
        }

        Self { seed, question_order, options }
    }

    /// Rebuild the layout of an earlier session. A persisted layout wins over a seed;
    /// an exam without shuffling needs neither. Never falls back to a fresh shuffle.
    pub fn restore(
        exam: &Exam,
        persisted: Option<ShuffleLayout>,
        seed: Option<u64>,
    ) -> Result<Self, String> {
        if let Some(layout) = persisted {
            layout.check_against(exam)?;
            return Ok(layout);
        }

        if let Some(seed) = seed {
            return Ok(Self::generate(exam, seed));
        }

        if !exam.shuffle_questions && !exam.shuffle_options {
            return Ok(Self::generate(exam, 0));
        }

        Err("server returned neither a shuffle layout nor a seed for a shuffled exam".to_string())
    }

    pub fn check_against(&self, exam: &Exam) -> Result<(), String> {
        if !is_permutation(&self.question_order, exam.questions.len()) {
            return Err("question order is not a permutation of the exam's questions".to_string());
        }

        for (question_id, shuffle) in &self.options {
            let question = exam
                .question(question_id)
                .ok_or_else(|| format!("option shuffle for unknown question '{question_id}'"))?;

            if !is_permutation(&shuffle.index_mapping, question.options.len()) {
                return Err(format!("option mapping for '{question_id}' is not a bijection"));
            }
            let texts_match = shuffle.shuffled_options.len() == question.options.len()
                && shuffle
                    .index_mapping
                    .iter()
                    .zip(&shuffle.shuffled_options)
                    .all(|(&original, text)| question.options[original] == *text);
            if !texts_match {
                return Err(format!("shuffled options for '{question_id}' do not match the exam"));
            }
        }

        Ok(())
    }

    pub fn option_shuffle(&self, question_id: &str) -> Option<&OptionShuffle> {
        self.options.get(question_id)
    }

    pub fn original_question_index(&self, position: usize) -> Option<usize> {
        self.question_order.get(position).copied()
    }

    pub fn index_mappings(&self) -> BTreeMap<String, Vec<usize>> {
        self.options
            .iter()
            .map(|(question_id, shuffle)| (question_id.clone(), shuffle.index_mapping.clone()))
            .collect()
    }
}

fn is_permutation(values: &[usize], len: usize) -> bool {
    if values.len() != len {
        return false;
    }
    let mut seen = vec![false; len];
    for &value in values {
        match seen.get_mut(value) {
            Some(slot) if !*slot => *slot = true,
            _ => return false,
        }
    }
    true
}

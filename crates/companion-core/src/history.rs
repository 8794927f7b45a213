use std::collections::VecDeque;

/// Previous AI replies, oldest first, kept in memory for the next prompts.
#[derive(Debug, Clone, Default)]
pub struct ResponseHistory {
    records: VecDeque<String>,
    max_records: usize,
}

impl ResponseHistory {
    /// `max_records == 0` keeps every reply.
    pub fn new(max_records: usize) -> Self {
        Self {
            records: VecDeque::with_capacity(max_records),
            max_records,
        }
    }

    pub fn push(&mut self, reply: impl Into<String>) {
        self.records.push_back(reply.into());
        if self.max_records > 0 {
            while self.records.len() > self.max_records {
                self.records.pop_front();
            }
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.records.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keeps_only_latest_records() {
        let mut history = ResponseHistory::new(2);
        history.push("first");
        history.push("second");
        history.push("third");

        assert_eq!(history.iter().collect::<Vec<_>>(), vec!["second", "third"]);
    }

    #[test]
    fn test_zero_limit_is_unbounded() {
        let mut history = ResponseHistory::new(0);
        for i in 0..100 {
            history.push(format!("reply {i}"));
        }
        assert_eq!(history.len(), 100);
    }
}

use crate::protocol::DataEvent;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResultRecord {
    pub id: String,
    pub channel: String,
    pub title: String,
    pub body: String,
}

impl ResultRecord {
    pub fn from_event(event: &DataEvent) -> Self {
        Self {
            id: event.payload.id.clone(),
            channel: event.channel_key().to_string(),
            title: event.payload.title.clone(),
            body: event.payload.body(),
        }
    }
}

/// Generated stories in arrival order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ResultSet {
    records: Vec<ResultRecord>,
}

impl ResultSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a new set with `event` folded in; `self` is left untouched.
    ///
    /// When `regenerate` names the event's channel, earlier records of that
    /// channel are dropped before the new record is appended.
    pub fn apply(&self, event: &DataEvent, regenerate: Option<&str>) -> ResultSet {
        let mut next = self.clone();
        next.apply_in_place(event, regenerate);
        next
    }

    fn apply_in_place(&mut self, event: &DataEvent, regenerate: Option<&str>) {
        let record = ResultRecord::from_event(event);
        if regenerate == Some(record.channel.as_str()) {
            self.records.retain(|existing| existing.channel != record.channel);
        }
        self.records.push(record);
    }

    pub fn records(&self) -> &[ResultRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::StoryPayload;
    use proptest::prelude::*;

    fn event(id: &str, channel: &str) -> DataEvent {
        DataEvent {
            payload: StoryPayload {
                id: id.to_string(),
                title: format!("title {}", id),
                story_content: format!("story {}", id),
                hashtags: vec!["#travel".to_string()],
                channel_type: None,
            },
            channel: Some(channel.to_string()),
        }
    }

    #[test]
    fn apply_does_not_mutate_input() {
        let empty = ResultSet::new();
        let next = empty.apply(&event("1", "fb"), None);
        assert!(empty.is_empty());
        assert_eq!(next.len(), 1);
        assert_eq!(next.records()[0].body, "story 1 #travel");
    }

    #[test]
    fn regeneration_replaces_and_moves_to_end() {
        let set = ResultSet::new()
            .apply(&event("A", "1"), None)
            .apply(&event("B", "2"), None)
            .apply(&event("C", "1"), Some("1"));

        let ids: Vec<_> = set.records().iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["B", "C"]);
    }

    #[test]
    fn regeneration_is_idempotent() {
        let regen = event("R", "fb");
        let set = ResultSet::new()
            .apply(&event("1", "fb"), None)
            .apply(&regen, Some("fb"))
            .apply(&regen, Some("fb"));

        assert_eq!(set.len(), 1);
        assert_eq!(set.records()[0].id, "R");
        assert_eq!(set.records()[0].channel, "fb");
    }

    #[test]
    fn regeneration_of_another_channel_appends() {
        let set = ResultSet::new()
            .apply(&event("1", "fb"), None)
            .apply(&event("2", "ig"), Some("fb"));
        assert_eq!(set.len(), 2);
        assert_eq!(set.records()[0].id, "1");
        assert_eq!(set.records()[0].channel, "fb");
    }

    #[test]
    fn missing_fields_become_empty() {
        let set = ResultSet::new().apply(
            &DataEvent {
                payload: StoryPayload::default(),
                channel: None,
            },
            None,
        );
        assert_eq!(
            set.records()[0],
            ResultRecord {
                id: String::new(),
                channel: String::new(),
                title: String::new(),
                body: String::new(),
            }
        );
    }

    proptest! {
        // Channels are unique per initial pass; every regeneration targets a
        // channel that already has a record.
        #[test]
        fn size_is_data_events_minus_regenerations(
            channels in 1usize..6,
            regens in proptest::collection::vec(0usize..6, 0..12),
        ) {
            let mut set = ResultSet::new();
            let mut dispatched = 0usize;
            let mut regenerations = 0usize;

            for c in 0..channels {
                set.apply_in_place(&event(&format!("i{c}"), &format!("c{c}")), None);
                dispatched += 1;
            }
            for (n, target) in regens.iter().enumerate() {
                let channel = format!("c{}", target % channels);
                set.apply_in_place(&event(&format!("r{n}"), &channel), Some(&channel));
                dispatched += 1;
                regenerations += 1;
            }

            prop_assert_eq!(set.len(), dispatched - regenerations);
            prop_assert_eq!(set.len(), channels);
        }
    }
}

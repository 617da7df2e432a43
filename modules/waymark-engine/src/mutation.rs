use std::sync::Arc;

use waymark_events::{DestinationId, Event};

use crate::traits::Mutation;

/// Ordered mutation pipeline. Cloning shares the steps.
#[derive(Clone, Default)]
pub struct Mutations {
    steps: Vec<Arc<dyn Mutation>>,
}

impl Mutations {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, mutation: impl Mutation + 'static) {
        self.steps.push(Arc::new(mutation));
    }

    /// Fold the event through every step, left to right. Empty = identity.
    pub fn transform(&self, event: Event, destination: &DestinationId) -> Event {
        self.steps
            .iter()
            .fold(event, |event, step| step.transform(event, destination))
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

impl std::fmt::Debug for Mutations {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mutations")
            .field("steps", &self.steps.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use waymark_events::Value;

    #[test]
    fn empty_pipeline_is_identity() {
        let event = Event::new("open").with_param("screen", "home");
        let out = Mutations::new().transform(event.clone(), &DestinationId::from("a"));
        assert_eq!(out, event);
    }

    #[test]
    fn steps_apply_in_registration_order() {
        let mut mutations = Mutations::new();
        mutations.push(|e: Event, _: &DestinationId| e.with_param("trail", "t1"));
        mutations.push(|e: Event, _: &DestinationId| {
            let trail = match e.param("trail") {
                Some(Value::String(s)) => format!("{s},t2"),
                _ => "t2".to_string(),
            };
            e.with_param("trail", trail)
        });

        let out = mutations.transform(Event::new("open"), &DestinationId::from("a"));

        assert_eq!(out.param("trail"), Some(&Value::from("t1,t2")));
        assert_eq!(mutations.len(), 2);
    }

    #[test]
    fn steps_see_the_destination() {
        let mut mutations = Mutations::new();
        mutations.push(|e: Event, id: &DestinationId| e.with_param("dest", id.as_str()));

        let out = mutations.transform(Event::new("open"), &DestinationId::from("firebase"));

        assert_eq!(out.param("dest"), Some(&Value::from("firebase")));
    }
}

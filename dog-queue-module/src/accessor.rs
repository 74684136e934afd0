use std::any::TypeId;

use dog_core::{Reflector, Target};
use dog_queue::WorkerOptions;

use crate::hosts::{EventsHostCaster, WorkerHostCaster};
use crate::metadata::{
    OnQueueEventMetadata, OnWorkerEventMetadata, ProcessorMetadata, QueueEventsListenerMetadata, EVENTS_HOST_METADATA,
    LISTENER_METADATA, ON_QUEUE_EVENT_METADATA, ON_WORKER_EVENT_METADATA, PROCESSOR_METADATA, WORKER_HOST_METADATA,
    WORKER_METADATA,
};

/// Typed, read-only view of the queue annotations in a [`Reflector`].
///
/// Every lookup takes a type identity; a `None` target reads as "not
/// annotated" rather than failing.
#[derive(Clone)]
pub struct QueueMetadataAccessor {
    reflector: Reflector,
}

impl QueueMetadataAccessor {
    /// Create an accessor reading from `reflector`.
    pub fn new(reflector: Reflector) -> Self {
        Self { reflector }
    }

    /// The side table annotations are stored in.
    pub fn reflector(&self) -> &Reflector {
        &self.reflector
    }

    /// Whether `target` was annotated as a processor.
    pub fn is_processor(&self, target: Option<TypeId>) -> bool {
        target.is_some_and(|id| self.reflector.has_metadata(PROCESSOR_METADATA, Target::Type(id)))
    }

    /// Queue binding declared for a processor.
    pub fn processor_metadata(&self, target: Option<TypeId>) -> Option<ProcessorMetadata> {
        self.reflector
            .get_metadata(PROCESSOR_METADATA, Target::Type(target?))
    }

    /// Declared worker tuning, empty when none was declared.
    pub fn worker_options(&self, target: Option<TypeId>) -> WorkerOptions {
        target
            .and_then(|id| self.reflector.get_metadata(WORKER_METADATA, Target::Type(id)))
            .unwrap_or_default()
    }

    /// Whether `target` was annotated as a queue events listener.
    pub fn is_queue_events_listener(&self, target: Option<TypeId>) -> bool {
        target.is_some_and(|id| self.reflector.has_metadata(LISTENER_METADATA, Target::Type(id)))
    }

    /// Queue and stream options declared for a listener.
    pub fn queue_events_listener_metadata(&self, target: Option<TypeId>) -> Option<QueueEventsListenerMetadata> {
        self.reflector
            .get_metadata(LISTENER_METADATA, Target::Type(target?))
    }

    /// Worker hook declared on the unbound method `method` of `target`.
    pub fn on_worker_event_metadata(&self, target: TypeId, method: &'static str) -> Option<OnWorkerEventMetadata> {
        self.reflector
            .get_metadata(ON_WORKER_EVENT_METADATA, Target::Method(target, method))
    }

    /// Queue-event hook declared on the unbound method `method` of `target`.
    pub fn on_queue_event_metadata(&self, target: TypeId, method: &'static str) -> Option<OnQueueEventMetadata> {
        self.reflector
            .get_metadata(ON_QUEUE_EVENT_METADATA, Target::Method(target, method))
    }

    /// Present when `target` was annotated as a `WorkerHost`.
    pub fn worker_host(&self, target: Option<TypeId>) -> Option<WorkerHostCaster> {
        self.reflector
            .get_metadata(WORKER_HOST_METADATA, Target::Type(target?))
    }

    /// Present when `target` was annotated as a `QueueEventsHost`.
    pub fn queue_events_host(&self, target: Option<TypeId>) -> Option<EventsHostCaster> {
        self.reflector
            .get_metadata(EVENTS_HOST_METADATA, Target::Type(target?))
    }

    /// Short type name for diagnostics.
    pub fn class_name(&self, target: TypeId) -> String {
        self.reflector.display_name(target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::annotate::Annotate;
    use crate::metadata::OnEventMetadata;
    use dog_queue::QueueEvent;

    struct Audit;
    struct Plain;

    #[test]
    fn absent_targets_read_as_unannotated() {
        let accessor = QueueMetadataAccessor::new(Reflector::new());
        assert!(!accessor.is_processor(None));
        assert!(accessor.processor_metadata(None).is_none());
        assert!(accessor.worker_options(None).is_empty());
        assert!(!accessor.is_queue_events_listener(Some(TypeId::of::<Plain>())));
    }

    #[test]
    fn reads_what_annotate_recorded() {
        let reflector = Reflector::new();
        Annotate::<Audit>::new(&reflector)
            .processor(ProcessorMetadata::new("audit").with_config_key("primary"))
            .worker_options(WorkerOptions::new().with("concurrency", 4))
            .on_worker_event("on_failed", OnEventMetadata::new("failed"), |_: &Audit, _: &QueueEvent| {});
        let accessor = QueueMetadataAccessor::new(reflector);
        let audit = Some(TypeId::of::<Audit>());

        assert!(accessor.is_processor(audit));
        assert!(!accessor.is_processor(Some(TypeId::of::<Plain>())));
        let meta = accessor.processor_metadata(audit).unwrap();
        assert_eq!(meta.queue_name(), "audit");
        assert_eq!(meta.config_key.as_deref(), Some("primary"));
        assert_eq!(accessor.worker_options(audit).concurrency(), 4);
        assert_eq!(
            accessor.on_worker_event_metadata(TypeId::of::<Audit>(), "on_failed").map(|m| m.event),
            Some("failed".to_string())
        );
        assert!(accessor.on_queue_event_metadata(TypeId::of::<Audit>(), "on_failed").is_none());
        // no `.worker_host()` call
        assert!(accessor.worker_host(audit).is_none());
        assert_eq!(accessor.class_name(TypeId::of::<Audit>()), "Audit");
    }
}

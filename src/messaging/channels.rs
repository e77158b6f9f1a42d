// Lock-free notification channel
// The producer half is safe to push from the real-time thread

use crate::messaging::notification::Notification;
use ringbuf::{traits::Split, HeapRb};

pub type NotificationProducer = ringbuf::HeapProd<Notification>;
pub type NotificationConsumer = ringbuf::HeapCons<Notification>;

pub fn create_notification_channel(
    capacity: usize,
) -> (NotificationProducer, NotificationConsumer) {
    let rb = HeapRb::<Notification>::new(capacity);
    rb.split()
}

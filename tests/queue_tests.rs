use jobplane::job::{PRIORITY_HIGH, PRIORITY_LOW, PRIORITY_NORMAL};
use jobplane::scheduler::PriorityQueue;

#[test]
fn strict_priority_order_across_levels() {
    let mut queue = PriorityQueue::new();
    queue.enqueue("a".into(), PRIORITY_LOW);
    queue.enqueue("b".into(), PRIORITY_LOW);
    queue.enqueue("c".into(), PRIORITY_HIGH);

    // Enqueue order is irrelevant across levels: high priority first.
    assert_eq!(queue.dequeue().as_deref(), Some("c"));
    assert_eq!(queue.dequeue().as_deref(), Some("a"));
    assert_eq!(queue.dequeue().as_deref(), Some("b"));
}

#[test]
fn fifo_within_a_priority_level() {
    let mut queue = PriorityQueue::new();
    for id in ["first", "second", "third"] {
        queue.enqueue(id.into(), PRIORITY_NORMAL);
    }

    assert_eq!(queue.dequeue().as_deref(), Some("first"));
    assert_eq!(queue.dequeue().as_deref(), Some("second"));
    assert_eq!(queue.dequeue().as_deref(), Some("third"));
}

#[test]
fn cancelled_before_dequeue_is_never_returned() {
    let mut queue = PriorityQueue::new();
    queue.enqueue("keep".into(), PRIORITY_NORMAL);
    queue.enqueue("drop".into(), PRIORITY_HIGH);

    queue.remove("drop");

    assert_eq!(queue.dequeue().as_deref(), Some("keep"));
    assert_eq!(queue.dequeue(), None);
}

#[test]
fn depth_counts_only_live_entries() {
    let mut queue = PriorityQueue::new();
    queue.enqueue("a".into(), PRIORITY_NORMAL);
    queue.enqueue("b".into(), PRIORITY_NORMAL);
    queue.enqueue("c".into(), PRIORITY_LOW);
    assert_eq!(queue.depth(), 3);

    queue.remove("b");
    assert_eq!(queue.depth(), 2);

    // The masked entry still sits in the heap but never surfaces.
    assert_eq!(queue.dequeue().as_deref(), Some("a"));
    assert_eq!(queue.dequeue().as_deref(), Some("c"));
    assert_eq!(queue.depth(), 0);
    assert_eq!(queue.dequeue(), None);
}

#[test]
fn interleaved_enqueue_dequeue_keeps_ordering() {
    let mut queue = PriorityQueue::new();
    queue.enqueue("n1".into(), PRIORITY_NORMAL);
    queue.enqueue("n2".into(), PRIORITY_NORMAL);
    assert_eq!(queue.dequeue().as_deref(), Some("n1"));

    // A later high-priority arrival jumps ahead of the older normal one.
    queue.enqueue("h1".into(), PRIORITY_HIGH);
    assert_eq!(queue.dequeue().as_deref(), Some("h1"));
    assert_eq!(queue.dequeue().as_deref(), Some("n2"));
}

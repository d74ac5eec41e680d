//! Texts sent to peers. Everything here is a pure function of its arguments.

use crate::identity::PeerId;
use crate::queue::PrintQueue;

/// Sent once, right after a friend request is accepted.
pub fn intro(suffix: &str) -> String {
    format!(
        "Hey, I am PrintBot and if you send me a {suffix} file I can try to print it out \
         on the 3D printer I am connected to! Send \"status\" to see where your files are \
         in the queue."
    )
}

/// Sent for any text that is not a command.
pub fn help(suffix: &str) -> String {
    format!(
        "I do not know what you mean by that, but if you send me a {suffix} file I can sure \
         try to print it out on the 3D printer I am connected to! Send \"status\" to see \
         your queued files."
    )
}

/// Sent for a `status` query when the peer has nothing queued.
pub const NOTHING_QUEUED: &str = "You have no files in the print queue.";

/// The only text command.
pub const STATUS_COMMAND: &str = "status";

pub fn is_status_command(text: &str) -> bool {
    text.trim().eq_ignore_ascii_case(STATUS_COMMAND)
}

pub fn received(filename: &str) -> String {
    format!("Thanks, I got {filename}!")
}

pub fn position(filename: &str, position: usize, total: usize) -> String {
    format!("{filename} is at position {position} of {total} in the print queue")
}

pub fn printing(filename: &str) -> String {
    format!("Printing {filename} now!")
}

pub fn printed(filename: &str) -> String {
    format!("I am happy to report {filename} is printed!")
}

pub fn print_failed(filename: &str) -> String {
    format!("Sorry, something went wrong while printing {filename}.")
}

pub fn format_rejected(suffix: &str) -> String {
    format!("Sorry, I only print from {suffix} files")
}

pub fn transfer_rejected(filename: &str) -> String {
    format!("Sorry, I cannot accept {filename}: it is empty or its name is unusable.")
}

pub fn transfer_in_use(filename: &str) -> String {
    format!(
        "Sorry, I am still receiving another file under the same transfer, please send \
         {filename} again once it is done."
    )
}

pub fn receive_failed(filename: &str) -> String {
    format!("Sorry, I could not save {filename}, please send it again.")
}

/// One line per queue entry of `peer`, in queue order. Empty when the peer has nothing queued.
pub fn status_report(queue: &PrintQueue, peer: PeerId) -> String {
    let total = queue.len();
    queue
        .positions_of(peer)
        .into_iter()
        .map(|(p, e)| position(&e.filename, p, total))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::Keypair;
    use crate::queue::QueueEntry;
    use std::path::PathBuf;

    #[test]
    fn status_lists_only_own_entries() {
        let a = Keypair::generate().peer_id();
        let b = Keypair::generate().peer_id();
        let mut q = PrintQueue::new();
        q.enqueue(QueueEntry::new(a, "one.gcode", PathBuf::from("/s/1")));
        q.enqueue(QueueEntry::new(b, "two.gcode", PathBuf::from("/s/2")));
        q.enqueue(QueueEntry::new(a, "three.gcode", PathBuf::from("/s/3")));

        assert_eq!(
            status_report(&q, a),
            "one.gcode is at position 1 of 3 in the print queue\n\
             three.gcode is at position 3 of 3 in the print queue"
        );
        assert_eq!(
            status_report(&q, b),
            "two.gcode is at position 2 of 3 in the print queue"
        );
        assert_eq!(status_report(&q, Keypair::generate().peer_id()), "");
    }

    #[test]
    fn status_is_idempotent() {
        let a = Keypair::generate().peer_id();
        let mut q = PrintQueue::new();
        q.enqueue(QueueEntry::new(a, "one.gcode", PathBuf::from("/s/1")));
        assert_eq!(status_report(&q, a), status_report(&q, a));
    }

    #[test]
    fn status_command_matching() {
        assert!(is_status_command("status"));
        assert!(is_status_command("  Status\n"));
        assert!(!is_status_command("status please"));
        assert!(!is_status_command(""));
    }
}

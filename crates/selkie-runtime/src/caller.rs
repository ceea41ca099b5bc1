//! Blocking call bridge
//!
//! TigerStyle: One-shot synchronization, explicit failure on disconnect.
//!
//! A `Caller` lets a thread outside the runtime wait synchronously for a
//! response produced by the asynchronous machinery. The response sink of a
//! call message holds the sending half; the waiting thread blocks on the
//! receiving half. If the message is destroyed without ever being completed
//! the channel disconnects and the caller observes `ServiceClosed` instead
//! of hanging.

use crossbeam_channel::{bounded, Receiver, Sender};

use selkie_core::{Error, Result};

use crate::message::Response;

/// One-shot latch bridging an external thread into the runtime
pub(crate) struct Caller {
    sender: Sender<Result<Response>>,
    receiver: Receiver<Result<Response>>,
}

impl Caller {
    pub(crate) fn new() -> Self {
        let (sender, receiver) = bounded(1);
        Self { sender, receiver }
    }

    /// Sending half, embedded in the call message's response sink
    pub(crate) fn sender(&self) -> Sender<Result<Response>> {
        self.sender.clone()
    }

    /// Block until the response arrives
    pub(crate) fn wait(self) -> Result<Response> {
        // Drop our sending half so that the channel disconnects once the
        // message (holding the only other sender) is gone.
        let Caller { sender, receiver } = self;
        drop(sender);

        match receiver.recv() {
            Ok(result) => result,
            Err(_disconnected) => Err(Error::ServiceClosed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_caller_receives_value() {
        let caller = Caller::new();
        let sender = caller.sender();

        std::thread::spawn(move || {
            sender.send(Ok(Box::new(7u64) as Response)).unwrap();
        });

        let response = caller.wait().unwrap();
        assert_eq!(*response.downcast::<u64>().unwrap(), 7);
    }

    #[test]
    fn test_caller_receives_error() {
        let caller = Caller::new();
        let sender = caller.sender();

        sender.send(Err(Error::ServiceClosed)).unwrap();
        assert!(caller.wait().unwrap_err().is_service_closed());
    }

    #[test]
    fn test_caller_disconnect_reports_closed() {
        let caller = Caller::new();
        let sender = caller.sender();
        drop(sender);

        assert!(caller.wait().unwrap_err().is_service_closed());
    }
}

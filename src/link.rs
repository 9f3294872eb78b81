//! Raw frame transmission on the generator ports

use crate::error::Error;
use crate::port::{PerPort, Port};

use pnet::datalink::{self, Channel, DataLinkSender};
use tracing::debug;

/// Sends prepared frames out of a port; there is no acknowledgment
pub trait LinkTransmit {
    fn send(&mut self, port: Port, frame: &[u8]) -> Result<(), Error>;
}

/// Layer 2 sender backed by a `pnet` datalink channel per interface
///
/// Channels are opened on first use and kept for the life of the link.
pub struct PnetLink {
    interfaces: PerPort<String>,
    senders: PerPort<Option<Box<dyn DataLinkSender>>>,
}

impl PnetLink {
    pub fn new(interfaces: PerPort<String>) -> Self {
        PnetLink {
            interfaces,
            senders: PerPort::default(),
        }
    }

    fn sender(&mut self, port: Port) -> Result<&mut Box<dyn DataLinkSender>, Error> {
        if self.senders[port].is_none() {
            let name = &self.interfaces[port];
            let link_err = |reason: String| Error::Link {
                iface: name.clone(),
                reason,
            };
            let iface = datalink::interfaces()
                .into_iter()
                .find(|i| &i.name == name)
                .ok_or_else(|| link_err("no such interface".to_string()))?;
            let tx = match datalink::channel(&iface, Default::default()) {
                Ok(Channel::Ethernet(tx, _rx)) => tx,
                Ok(_) => return Err(link_err("not an ethernet channel".to_string())),
                Err(e) => return Err(link_err(e.to_string())),
            };
            debug!(iface = %name, "datalink channel opened");
            self.senders[port] = Some(tx);
        }
        self.senders[port]
            .as_mut()
            .ok_or_else(|| Error::Link {
                iface: self.interfaces[port].clone(),
                reason: "channel unavailable".to_string(),
            })
    }
}

impl LinkTransmit for PnetLink {
    fn send(&mut self, port: Port, frame: &[u8]) -> Result<(), Error> {
        let tx = self.sender(port)?;
        match tx.send_to(frame, None) {
            Some(Ok(())) => Ok(()),
            Some(Err(e)) => Err(Error::Link {
                iface: self.interfaces[port].clone(),
                reason: e.to_string(),
            }),
            None => Err(Error::Link {
                iface: self.interfaces[port].clone(),
                reason: "send buffer exhausted".to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn unknown_interface() {
        let mut link = PnetLink::new(PerPort::new(
            "osnt-missing0".to_string(),
            "osnt-missing1".to_string(),
        ));
        let err = link.send(Port::Port1, &[0u8; 60]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Link);
        assert!(err.to_string().contains("osnt-missing1"));
    }
}

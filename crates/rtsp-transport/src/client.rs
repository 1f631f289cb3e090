//! The capability interface a transport calls back into. Kept small and
//! value-based rather than an inheritance hierarchy: implementors provide
//! one value satisfying this trait, not a subclass of a base transport.

use rtsp_rtcp::Compound;
use rtsp_rtp::Rtp;

use crate::TransportError;

pub trait TransportClient: Send + Sync {
    fn on_rtp(&self, rtp: Rtp);
    fn on_rtcp(&self, compound: Compound);
    fn on_closed(&self, error: Option<TransportError>);
}

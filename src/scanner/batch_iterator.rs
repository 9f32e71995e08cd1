use std::net::{IpAddr, SocketAddr};

/// Groups a port sequence into windows of at most `capacity` targets.
///
/// Ports are pulled lazily, one window at a time. Every window except the
/// last holds exactly `capacity` targets; an empty sequence yields no
/// window at all.
pub struct BatchIterator<I> {
    ip: IpAddr,
    ports: I,
    capacity: usize,
    exhausted: bool,
}

impl<I> BatchIterator<I>
where
    I: Iterator<Item = u16>,
{
    pub fn new(ip: IpAddr, ports: I, capacity: usize) -> Self {
        Self {
            ip,
            ports,
            capacity: capacity.max(1),
            exhausted: false,
        }
    }
}

impl<I> Iterator for BatchIterator<I>
where
    I: Iterator<Item = u16>,
{
    type Item = Vec<SocketAddr>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.exhausted {
            return None;
        }

        let ip = self.ip;
        let window = self
            .ports
            .by_ref()
            .take(self.capacity)
            .map(|port| SocketAddr::new(ip, port))
            .collect::<Vec<_>>();

        // A short window means the source ran dry; don't poll it again.
        if window.len() < self.capacity {
            self.exhausted = true;
        }

        if window.is_empty() {
            None
        } else {
            Some(window)
        }
    }
}

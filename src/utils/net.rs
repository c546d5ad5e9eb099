use socket2::TcpKeepalive;
use std::net::TcpStream;
use std::time::Duration;

/// Enable TCP keepalive on the stream socket so a silently vanished peer
/// eventually surfaces as a read error instead of a permanent stall.
pub fn set_keep_alive(stream: &TcpStream) -> std::io::Result<()> {
    let sock_ref = socket2::SockRef::from(stream);

    let keep_alive = TcpKeepalive::new()
        .with_time(Duration::from_secs(20))
        .with_interval(Duration::from_secs(20));

    sock_ref.set_tcp_keepalive(&keep_alive)
}

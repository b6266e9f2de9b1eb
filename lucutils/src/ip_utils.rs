use get_if_addrs::get_if_addrs;
use std::net::{Ipv4Addr, UdpSocket};

/// Devine l'adresse IPv4 locale de la machine.
///
/// Crée un socket UDP vers un serveur DNS public pour demander au système
/// quelle interface serait utilisée pour une connexion sortante, sans émettre
/// de trafic (UDP est sans connexion). Retourne `127.0.0.1` en cas d'échec.
pub fn guess_local_ip() -> Ipv4Addr {
    if let Ok(socket) = UdpSocket::bind("0.0.0.0:0") {
        if socket.connect("8.8.8.8:80").is_ok() {
            if let Ok(local_addr) = socket.local_addr() {
                if let std::net::IpAddr::V4(v4) = local_addr.ip() {
                    return v4;
                }
            }
        }
    }
    Ipv4Addr::LOCALHOST
}

/// Liste les adresses IPv4 non-loopback de toutes les interfaces.
///
/// Chaque entrée est un couple `(nom d'interface, adresse)`. Les adresses
/// IPv6 et le loopback sont filtrés.
pub fn list_ipv4_addrs() -> Vec<(String, Ipv4Addr)> {
    let mut result = Vec::new();

    if let Ok(interfaces) = get_if_addrs() {
        for iface in interfaces {
            match iface.ip() {
                std::net::IpAddr::V4(v4) if !v4.is_loopback() => {
                    result.push((iface.name, v4));
                }
                _ => {}
            }
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guess_local_ip_not_unspecified() {
        let ip = guess_local_ip();
        assert!(!ip.is_unspecified());
    }

    #[test]
    fn test_list_ipv4_addrs_no_loopback() {
        for (_, addr) in list_ipv4_addrs() {
            assert!(!addr.is_loopback());
        }
    }

    #[test]
    fn test_list_ipv4_addrs_names_not_empty() {
        for (name, _) in list_ipv4_addrs() {
            assert!(!name.is_empty());
        }
    }
}

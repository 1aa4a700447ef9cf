//! §4.1 ConnectionRegistry.
//!
//! Grounded in the teacher's `ConnectionManager`, but collapsed to plain
//! ownership (no `Arc<RwLock<_>>`): the whole router state lives behind one
//! serialized dispatch loop (spec §5), so a second layer of interior
//! mutability here would only hide bugs, not prevent them.

use std::collections::HashMap;

use uuid::Uuid;

use crate::model::{Address, Connection};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindError {
    AddressInUse,
}

#[derive(Default)]
pub struct ConnectionRegistry {
    by_session: HashMap<Uuid, Connection>,
    by_address: HashMap<Address, Uuid>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, conn: Connection) {
        self.by_session.insert(conn.session_id, conn);
    }

    pub fn get(&self, session_id: Uuid) -> Option<&Connection> {
        self.by_session.get(&session_id)
    }

    pub fn get_mut(&mut self, session_id: Uuid) -> Option<&mut Connection> {
        self.by_session.get_mut(&session_id)
    }

    pub fn by_address(&self, address: &Address) -> Option<&Connection> {
        self.by_address.get(address).and_then(|id| self.by_session.get(id))
    }

    pub fn session_for_address(&self, address: &Address) -> Option<Uuid> {
        self.by_address.get(address).copied()
    }

    /// Binds `address` to `session_id`. Fails with `AddressInUse` only when a
    /// *different* live connection already owns it; rebinding the same
    /// connection is a no-op metadata refresh (spec §4.1).
    pub fn bind_address(&mut self, session_id: Uuid, address: Address) -> Result<(), BindError> {
        if let Some(existing) = self.by_address.get(&address) {
            if *existing != session_id {
                return Err(BindError::AddressInUse);
            }
        }

        // Remove any prior address mapping for this session before inserting
        // the new one, atomically with respect to the dispatch loop (spec
        // §4.1: "prior mapping is removed before the new one is inserted").
        if let Some(conn) = self.by_session.get(&session_id) {
            if let Some(prior) = &conn.address {
                if prior != &address {
                    self.by_address.remove(prior);
                }
            }
        }

        self.by_address.insert(address.clone(), session_id);
        if let Some(conn) = self.by_session.get_mut(&session_id) {
            conn.address = Some(address);
        }
        Ok(())
    }

    /// Clears both session and address mappings for a disconnecting
    /// connection and returns the removed `Connection`.
    pub fn remove(&mut self, session_id: Uuid) -> Option<Connection> {
        let conn = self.by_session.remove(&session_id)?;
        if let Some(address) = &conn.address {
            if self.by_address.get(address) == Some(&session_id) {
                self.by_address.remove(address);
            }
        }
        Some(conn)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Connection> {
        self.by_session.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Connection> {
        self.by_session.values_mut()
    }

    pub fn len(&self) -> usize {
        self.by_session.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_session.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::NullTransport;
    use chrono::Utc;

    fn new_conn() -> Connection {
        Connection::new(Uuid::new_v4(), Box::new(NullTransport), Utc::now())
    }

    #[test]
    fn bind_then_lookup_by_address() {
        let mut reg = ConnectionRegistry::new();
        let conn = new_conn();
        let session = conn.session_id;
        reg.insert(conn);
        let addr = Address::parse("a@x.com").unwrap();
        reg.bind_address(session, addr.clone()).unwrap();
        assert_eq!(reg.by_address(&addr).unwrap().session_id, session);
    }

    #[test]
    fn binding_same_session_twice_is_a_refresh() {
        let mut reg = ConnectionRegistry::new();
        let conn = new_conn();
        let session = conn.session_id;
        reg.insert(conn);
        let addr = Address::parse("a@x.com").unwrap();
        reg.bind_address(session, addr.clone()).unwrap();
        assert!(reg.bind_address(session, addr).is_ok());
    }

    #[test]
    fn binding_taken_address_from_another_session_fails() {
        let mut reg = ConnectionRegistry::new();
        let c1 = new_conn();
        let s1 = c1.session_id;
        let c2 = new_conn();
        let s2 = c2.session_id;
        reg.insert(c1);
        reg.insert(c2);
        let addr = Address::parse("a@x.com").unwrap();
        reg.bind_address(s1, addr.clone()).unwrap();
        assert_eq!(reg.bind_address(s2, addr).unwrap_err(), BindError::AddressInUse);
    }

    #[test]
    fn rebinding_to_new_address_frees_the_old_one() {
        let mut reg = ConnectionRegistry::new();
        let conn = new_conn();
        let session = conn.session_id;
        reg.insert(conn);
        let a1 = Address::parse("a@x.com").unwrap();
        let a2 = Address::parse("b@x.com").unwrap();
        reg.bind_address(session, a1.clone()).unwrap();
        reg.bind_address(session, a2.clone()).unwrap();
        assert!(reg.by_address(&a1).is_none());
        assert!(reg.by_address(&a2).is_some());
    }

    #[test]
    fn remove_clears_address_mapping() {
        let mut reg = ConnectionRegistry::new();
        let conn = new_conn();
        let session = conn.session_id;
        reg.insert(conn);
        let addr = Address::parse("a@x.com").unwrap();
        reg.bind_address(session, addr.clone()).unwrap();
        reg.remove(session);
        assert!(reg.by_address(&addr).is_none());
        assert!(reg.get(session).is_none());
    }
}

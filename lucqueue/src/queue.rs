//! File de lecture à double ordre : ordre de lecture et ordre de brassage.
//!
//! Deux listes circulaires partagent les mêmes éléments, réalisées en arène :
//! un stockage contigu de créneaux plus deux paires d'index `next/prev` par
//! ordre. La sentinelle de tête occupe le créneau 0 et porte l'`item_id` 0 ;
//! elle est immortelle. Chaque élément apparaît exactement une fois dans
//! chaque ordre et son `item_id`, monotone par file, n'est jamais réutilisé.

use crate::rng::Rng;
use tracing::warn;

/// Mode de répétition du parcours
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepeatMode {
    Off,
    Song,
    All,
}

/// Vue publique d'un élément de file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueItem {
    /// Identifiant unique dans la file (0 = sentinelle, jamais rendu)
    pub item_id: u32,
    /// Identifiant du morceau dans le catalogue
    pub song_id: u32,
    /// Durée en millisecondes
    pub len_ms: u32,
    pub data_kind: u32,
    pub media_kind: u32,
}

impl QueueItem {
    /// Élément prêt à insérer (l'`item_id` est attribué par la file)
    pub fn new(song_id: u32, len_ms: u32, data_kind: u32, media_kind: u32) -> Self {
        QueueItem {
            item_id: 0,
            song_id,
            len_ms,
            data_kind,
            media_kind,
        }
    }
}

const HEAD: usize = 0;

#[derive(Debug, Clone)]
struct Slot {
    item: QueueItem,
    next: usize,
    prev: usize,
    shuffle_next: usize,
    shuffle_prev: usize,
    free: bool,
}

/// La file de lecture
pub struct Queue {
    slots: Vec<Slot>,
    free_slots: Vec<usize>,
    last_item_id: u32,
    rng: Rng,
}

impl Queue {
    pub fn new() -> Self {
        Self::with_rng(Rng::new())
    }

    /// File avec générateur fourni (brassages rejouables)
    pub fn with_rng(rng: Rng) -> Self {
        let head = Slot {
            item: QueueItem {
                item_id: 0,
                song_id: 0,
                len_ms: 0,
                data_kind: 0,
                media_kind: 0,
            },
            next: HEAD,
            prev: HEAD,
            shuffle_next: HEAD,
            shuffle_prev: HEAD,
            free: false,
        };
        Queue {
            slots: vec![head],
            free_slots: Vec::new(),
            last_item_id: 0,
            rng,
        }
    }

    fn link_next(&self, slot: usize, shuffle: bool) -> usize {
        if shuffle {
            self.slots[slot].shuffle_next
        } else {
            self.slots[slot].next
        }
    }

    fn link_prev(&self, slot: usize, shuffle: bool) -> usize {
        if shuffle {
            self.slots[slot].shuffle_prev
        } else {
            self.slots[slot].prev
        }
    }

    /// Nombre d'éléments (hors sentinelle)
    pub fn count(&self) -> usize {
        let mut n = 0;
        let mut cur = self.slots[HEAD].next;
        while cur != HEAD {
            n += 1;
            cur = self.slots[cur].next;
        }
        n
    }

    fn slot_by_item_id(&self, item_id: u32) -> Option<usize> {
        if item_id == 0 {
            return None;
        }
        let mut cur = self.slots[HEAD].next;
        while cur != HEAD {
            if self.slots[cur].item.item_id == item_id {
                return Some(cur);
            }
            cur = self.slots[cur].next;
        }
        None
    }

    fn slot_by_index(&self, index: usize, shuffle: bool) -> Option<usize> {
        let mut cur = self.link_next(HEAD, shuffle);
        let mut i = 0;
        while cur != HEAD {
            if i == index {
                return Some(cur);
            }
            i += 1;
            cur = self.link_next(cur, shuffle);
        }
        None
    }

    /// Créneau à `pos` pas après l'élément `item_id` dans l'ordre choisi
    fn slot_by_pos(&self, item_id: u32, pos: usize, shuffle: bool) -> Option<usize> {
        let mut cur = self.slot_by_item_id(item_id).unwrap_or(HEAD);
        for _ in 0..pos {
            cur = self.link_next(cur, shuffle);
            if cur == HEAD {
                return None;
            }
        }
        if cur == HEAD { None } else { Some(cur) }
    }

    /// Élément par identifiant
    pub fn get_by_item_id(&self, item_id: u32) -> Option<QueueItem> {
        self.slot_by_item_id(item_id)
            .map(|slot| self.slots[slot].item.clone())
    }

    /// Élément par position 0-based dans l'ordre choisi
    pub fn get_by_index(&self, index: usize, shuffle: bool) -> Option<QueueItem> {
        self.slot_by_index(index, shuffle)
            .map(|slot| self.slots[slot].item.clone())
    }

    /// Élément à `pos` pas après l'élément `item_id`
    pub fn get_by_pos(&self, item_id: u32, pos: usize, shuffle: bool) -> Option<QueueItem> {
        self.slot_by_pos(item_id, pos, shuffle)
            .map(|slot| self.slots[slot].item.clone())
    }

    /// Position 0-based d'un élément dans l'ordre choisi
    pub fn index_by_item_id(&self, item_id: u32, shuffle: bool) -> Option<usize> {
        let mut cur = self.link_next(HEAD, shuffle);
        let mut i = 0;
        while cur != HEAD {
            if self.slots[cur].item.item_id == item_id {
                return Some(i);
            }
            i += 1;
            cur = self.link_next(cur, shuffle);
        }
        None
    }

    fn alloc(&mut self, mut item: QueueItem) -> usize {
        self.last_item_id += 1;
        item.item_id = self.last_item_id;
        let slot = Slot {
            item,
            next: HEAD,
            prev: HEAD,
            shuffle_next: HEAD,
            shuffle_prev: HEAD,
            free: false,
        };
        if let Some(idx) = self.free_slots.pop() {
            self.slots[idx] = slot;
            idx
        } else {
            self.slots.push(slot);
            self.slots.len() - 1
        }
    }

    /// Insère une suite d'éléments après `after` dans les deux ordres
    fn splice_after(&mut self, items: Vec<QueueItem>, after: usize) -> Vec<u32> {
        let mut ids = Vec::with_capacity(items.len());
        let mut prev = after;
        let tail_next = self.slots[after].next;
        let tail_shuffle_next = self.slots[after].shuffle_next;

        for item in items {
            let idx = self.alloc(item);
            ids.push(self.slots[idx].item.item_id);
            self.slots[prev].next = idx;
            self.slots[prev].shuffle_next = idx;
            self.slots[idx].prev = prev;
            self.slots[idx].shuffle_prev = prev;
            prev = idx;
        }

        self.slots[prev].next = tail_next;
        self.slots[prev].shuffle_next = tail_shuffle_next;
        self.slots[tail_next].prev = prev;
        self.slots[tail_shuffle_next].shuffle_prev = prev;

        ids
    }

    /// Ajoute en queue des deux ordres ; retourne les identifiants attribués
    pub fn add(&mut self, items: Vec<QueueItem>) -> Vec<u32> {
        let tail = self.slots[HEAD].prev;
        self.splice_after(items, tail)
    }

    /// Ajoute après l'élément `item_id` ; échoue s'il est introuvable
    pub fn add_after(&mut self, items: Vec<QueueItem>, item_id: u32) -> Option<Vec<u32>> {
        let after = self.slot_by_item_id(item_id)?;
        Some(self.splice_after(items, after))
    }

    /// Déplace `item` devant `target` dans l'ordre choisi uniquement ;
    /// `target` à `None` signifie la fin de file
    fn move_before(&mut self, item: usize, target: Option<usize>, shuffle: bool) {
        let target = target.unwrap_or(HEAD);
        if item == target {
            return;
        }

        // retrait de l'ordre choisi
        if shuffle {
            let (p, n) = (self.slots[item].shuffle_prev, self.slots[item].shuffle_next);
            self.slots[p].shuffle_next = n;
            self.slots[n].shuffle_prev = p;
        } else {
            let (p, n) = (self.slots[item].prev, self.slots[item].next);
            self.slots[p].next = n;
            self.slots[n].prev = p;
        }

        // réinsertion devant la cible
        if shuffle {
            let before = self.slots[target].shuffle_prev;
            self.slots[before].shuffle_next = item;
            self.slots[item].shuffle_prev = before;
            self.slots[item].shuffle_next = target;
            self.slots[target].shuffle_prev = item;
        } else {
            let before = self.slots[target].prev;
            self.slots[before].next = item;
            self.slots[item].prev = before;
            self.slots[item].next = target;
            self.slots[target].prev = item;
        }
    }

    /// Déplace l'élément à `from_pos` (relatif à `item_id`) devant l'élément
    /// à `to_offset`
    pub fn move_by_pos(&mut self, item_id: u32, from_pos: usize, to_offset: usize, shuffle: bool) {
        let Some(item) = self.slot_by_pos(item_id, from_pos, shuffle) else {
            warn!("Invalid position given to move items");
            return;
        };
        let target = self.slot_by_pos(item_id, to_offset + 1, shuffle);
        self.move_before(item, target, shuffle);
    }

    /// Déplace l'élément d'index `from_pos` à l'index `to_pos`
    pub fn move_by_index(&mut self, from_pos: usize, mut to_pos: usize, shuffle: bool) {
        if from_pos == to_pos {
            return;
        }
        let Some(item) = self.slot_by_index(from_pos, shuffle) else {
            warn!("Invalid position given to move items");
            return;
        };
        // l'index cible est donné dans la file sans l'élément déplacé
        if from_pos < to_pos {
            to_pos += 1;
        }
        let target = self.slot_by_index(to_pos, shuffle);
        self.move_before(item, target, shuffle);
    }

    /// Déplace l'élément `item_id` à l'index `to_pos`
    pub fn move_by_item_id(&mut self, item_id: u32, mut to_pos: usize, shuffle: bool) {
        let Some(item) = self.slot_by_item_id(item_id) else {
            warn!(item_id, "Item does not exist in the queue");
            return;
        };
        let Some(from_pos) = self.index_by_item_id(item_id, shuffle) else {
            return;
        };
        if from_pos == to_pos {
            return;
        }
        if from_pos < to_pos {
            to_pos += 1;
        }
        let target = self.slot_by_index(to_pos, shuffle);
        self.move_before(item, target, shuffle);
    }

    /// Délie un créneau des deux ordres d'un coup et le libère
    fn unlink_and_free(&mut self, slot: usize) {
        let (p, n) = (self.slots[slot].prev, self.slots[slot].next);
        self.slots[p].next = n;
        self.slots[n].prev = p;

        let (sp, sn) = (self.slots[slot].shuffle_prev, self.slots[slot].shuffle_next);
        self.slots[sp].shuffle_next = sn;
        self.slots[sn].shuffle_prev = sp;

        self.slots[slot].free = true;
        self.free_slots.push(slot);
    }

    /// Retire l'élément `item_id`
    pub fn remove_by_item_id(&mut self, item_id: u32) {
        if item_id == 0 {
            return; // la sentinelle ne part jamais
        }
        match self.slot_by_item_id(item_id) {
            Some(slot) => self.unlink_and_free(slot),
            None => warn!(item_id, "Invalid item id given to remove items"),
        }
    }

    /// Retire l'élément d'index `index` dans l'ordre choisi
    pub fn remove_by_index(&mut self, index: usize, shuffle: bool) {
        match self.slot_by_index(index, shuffle) {
            Some(slot) => self.unlink_and_free(slot),
            None => warn!(index, "Invalid position given to remove items"),
        }
    }

    /// Retire l'élément à `pos` pas après `item_id`
    pub fn remove_by_pos(&mut self, item_id: u32, pos: usize, shuffle: bool) {
        match self.slot_by_pos(item_id, pos, shuffle) {
            Some(slot) => self.unlink_and_free(slot),
            None => warn!(pos, "Invalid position given to remove items"),
        }
    }

    /// Vide la file ; la sentinelle reste
    pub fn clear(&mut self) {
        let mut cur = self.slots[HEAD].next;
        while cur != HEAD {
            let next = self.slots[cur].next;
            self.slots[cur].free = true;
            self.free_slots.push(cur);
            cur = next;
        }
        let head = &mut self.slots[HEAD];
        head.next = HEAD;
        head.prev = HEAD;
        head.shuffle_next = HEAD;
        head.shuffle_prev = HEAD;
    }

    /// Remet l'ordre de brassage sur l'ordre de lecture et retourne le
    /// créneau de `item_id` (la sentinelle s'il est introuvable)
    fn reset_and_find(&mut self, item_id: u32) -> usize {
        let mut found = HEAD;
        let mut cur = HEAD;
        loop {
            let next = self.slots[cur].next;
            let prev = self.slots[cur].prev;
            self.slots[cur].shuffle_next = next;
            self.slots[cur].shuffle_prev = prev;
            if cur != HEAD && self.slots[cur].item.item_id == item_id {
                found = cur;
            }
            cur = next;
            if cur == HEAD {
                break;
            }
        }
        found
    }

    /// Brasse l'ordre de brassage strictement après l'élément `item_id`
    /// (0 pour toute la file) ; l'ordre de lecture n'est pas touché
    pub fn shuffle(&mut self, item_id: u32) {
        let seed = self.reset_and_find(item_id);

        let mut items: Vec<usize> = Vec::new();
        let mut cur = self.slots[seed].next;
        while cur != HEAD {
            items.push(cur);
            cur = self.slots[cur].next;
        }

        if items.len() < 2 {
            return;
        }

        self.rng.shuffle(&mut items);

        let mut prev = seed;
        for &idx in &items {
            self.slots[prev].shuffle_next = idx;
            self.slots[idx].shuffle_prev = prev;
            prev = idx;
        }
        self.slots[prev].shuffle_next = HEAD;
        self.slots[HEAD].shuffle_prev = prev;
    }

    /// Élément suivant depuis `item_id` dans l'ordre choisi.
    ///
    /// En fin de file : `RepeatMode::All` reboucle sur le premier élément
    /// (en rebrassant d'abord si `reshuffle`), `RepeatMode::Song` rend
    /// l'élément de départ, sinon rien.
    pub fn next(
        &mut self,
        item_id: u32,
        shuffle: bool,
        repeat: RepeatMode,
        reshuffle: bool,
    ) -> Option<QueueItem> {
        let slot = self.slot_by_item_id(item_id).unwrap_or(HEAD);

        if repeat == RepeatMode::Song && slot != HEAD {
            return Some(self.slots[slot].item.clone());
        }

        let mut next = self.link_next(slot, shuffle);

        if next == HEAD && repeat == RepeatMode::All {
            if reshuffle {
                self.shuffle(0);
            }
            next = self.link_next(HEAD, shuffle);
        }

        if next == HEAD {
            None
        } else {
            Some(self.slots[next].item.clone())
        }
    }

    /// Élément précédent, symétrique de [`Queue::next`]
    pub fn prev(&mut self, item_id: u32, shuffle: bool, repeat: RepeatMode) -> Option<QueueItem> {
        let slot = self.slot_by_item_id(item_id)?;

        if repeat == RepeatMode::Song {
            return Some(self.slots[slot].item.clone());
        }

        let mut prev = self.link_prev(slot, shuffle);

        if prev == HEAD && repeat == RepeatMode::All {
            prev = self.link_prev(HEAD, shuffle);
        }

        if prev == HEAD {
            None
        } else {
            Some(self.slots[prev].item.clone())
        }
    }

    /// Identifiants atteignables dans l'ordre choisi (pour vérification)
    pub fn item_ids(&self, shuffle: bool) -> Vec<u32> {
        let mut ids = Vec::new();
        let mut cur = self.link_next(HEAD, shuffle);
        while cur != HEAD {
            ids.push(self.slots[cur].item.item_id);
            cur = self.link_next(cur, shuffle);
        }
        ids
    }
}

impl Default for Queue {
    fn default() -> Self {
        Self::new()
    }
}

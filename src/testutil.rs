// Copyright 2023 Red Hat, Inc.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Builds small ISO 9660 images in memory for tests.

use std::collections::{BTreeMap, BTreeSet};

const SECTOR: usize = 2048;
const ROOT_SECTOR: usize = 18;

/// Lays out an image containing the given files.  Paths are on-disc
/// names relative to the root, e.g. "EFI/REDHAT/GRUB.CFG".  Every
/// directory gets a single sector, which is plenty for tests.
pub fn build_iso(files: &BTreeMap<&str, Vec<u8>>) -> Vec<u8> {
    // directory path -> child names, with a trailing '/' marking dirs
    let mut dirs: BTreeMap<String, BTreeSet<(String, bool)>> = BTreeMap::new();
    dirs.insert(String::new(), BTreeSet::new());
    for path in files.keys() {
        let components: Vec<&str> = path.split('/').collect();
        let mut parent = String::new();
        for (i, c) in components.iter().enumerate() {
            let is_dir = i + 1 < components.len();
            dirs.entry(parent.clone())
                .or_default()
                .insert((c.to_string(), is_dir));
            if is_dir {
                parent = join(&parent, c);
                dirs.entry(parent.clone()).or_default();
            }
        }
    }

    let mut addresses: BTreeMap<String, usize> = BTreeMap::new();
    let mut next = ROOT_SECTOR;
    for dir in dirs.keys() {
        addresses.insert(dir.clone(), next);
        next += 1;
    }
    for (path, data) in files {
        addresses.insert(path.to_string(), next);
        next += ((data.len() + SECTOR - 1) / SECTOR).max(1);
    }

    let mut image = vec![0u8; next * SECTOR];

    // primary volume descriptor
    let pvd = &mut image[16 * SECTOR..17 * SECTOR];
    pvd[0] = 1;
    pvd[1..6].copy_from_slice(b"CD001");
    pvd[6] = 1;
    pad_copy(&mut pvd[8..40], b"LINUX");
    pad_copy(&mut pvd[40..72], b"KARGS-TEST");
    pvd[80..84].copy_from_slice(&(next as u32).to_le_bytes());
    pvd[84..88].copy_from_slice(&(next as u32).to_be_bytes());
    let root = record(&[0], ROOT_SECTOR, SECTOR, true);
    pvd[156..156 + root.len()].copy_from_slice(&root);

    // terminator
    let term = &mut image[17 * SECTOR..18 * SECTOR];
    term[0] = 255;
    term[1..6].copy_from_slice(b"CD001");
    term[6] = 1;

    for (dir, children) in &dirs {
        let parent = match dir.rsplit_once('/') {
            Some((p, _)) => p.to_string(),
            None => String::new(),
        };
        let mut contents = Vec::new();
        contents.extend(record(&[0], addresses[dir], SECTOR, true));
        contents.extend(record(&[1], addresses[&parent], SECTOR, true));
        for (name, is_dir) in children {
            let path = join(dir, name);
            if *is_dir {
                contents.extend(record(name.as_bytes(), addresses[&path], SECTOR, true));
            } else {
                let ident = format!("{};1", name);
                let len = files[path.as_str()].len();
                contents.extend(record(ident.as_bytes(), addresses[&path], len, false));
            }
        }
        assert!(contents.len() <= SECTOR, "too many entries in {}", dir);
        let start = addresses[dir] * SECTOR;
        image[start..start + contents.len()].copy_from_slice(&contents);
    }

    for (path, data) in files {
        let start = addresses[*path] * SECTOR;
        image[start..start + data.len()].copy_from_slice(data);
    }
    image
}

fn join(parent: &str, name: &str) -> String {
    if parent.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", parent, name)
    }
}

fn pad_copy(dest: &mut [u8], src: &[u8]) {
    dest.fill(b' ');
    dest[..src.len()].copy_from_slice(src);
}

fn record(name: &[u8], sector: usize, length: usize, is_dir: bool) -> Vec<u8> {
    let mut len = 33 + name.len();
    if len % 2 == 1 {
        len += 1;
    }
    let mut r = vec![0u8; len];
    r[0] = len as u8;
    r[2..6].copy_from_slice(&(sector as u32).to_le_bytes());
    r[6..10].copy_from_slice(&(sector as u32).to_be_bytes());
    r[10..14].copy_from_slice(&(length as u32).to_le_bytes());
    r[14..18].copy_from_slice(&(length as u32).to_be_bytes());
    r[25] = if is_dir { 2 } else { 0 };
    r[28] = 1; // volume sequence number
    r[32] = name.len() as u8;
    r[33..33 + name.len()].copy_from_slice(name);
    r
}

/// A live ISO grub config whose embed area has `padding` comment
/// characters before the marker.
pub fn grub_cfg(padding: usize) -> Vec<u8> {
    format!(
        "set timeout=5\n\
         menuentry 'Fedora CoreOS (Live)' --class fedora {{\n\
         \tlinux /images/pxeboot/vmlinuz coreos.liveiso=fedora-coreos ignition.firstboot\n\
         {}# COREOS_KARG_EMBED_AREA\n\
         \tinitrd /images/pxeboot/initrd.img /images/ignition.img\n\
         }}\n",
        "#".repeat(padding)
    )
    .into_bytes()
}
